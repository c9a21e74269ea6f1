//! In-memory document collections behind the resource groups.
//!
//! Stands in for the persistence layer so the pipeline can be exercised end
//! to end. Documents are free-form JSON objects; the catalog only assigns an
//! `id` and records the `requestedAt` stamp of the creating request.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Collections served under `/api/v1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Products,
    Categories,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Users,
        Collection::Products,
        Collection::Categories,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Products => "products",
            Collection::Categories => "categories",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(serialize_with = "serialize_millis")]
    pub requested_at: DateTime<Utc>,
}

fn serialize_millis<S: serde::Serializer>(
    time: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

/// Shared, clonable handle to all collections.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    collections: Arc<RwLock<HashMap<Collection, Vec<Document>>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents in insertion order.
    pub async fn list(&self, collection: Collection) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn get(&self, collection: Collection, id: Uuid) -> Option<Document> {
        self.collections
            .read()
            .await
            .get(&collection)?
            .iter()
            .find(|doc| doc.id == id)
            .cloned()
    }

    /// Store `fields` as a new document. Client-supplied `id`/`requestedAt`
    /// keys are replaced by the catalog's own.
    pub async fn insert(
        &self,
        collection: Collection,
        mut fields: Map<String, Value>,
        requested_at: DateTime<Utc>,
    ) -> Document {
        fields.remove("id");
        fields.remove("requestedAt");

        let document = Document {
            id: Uuid::new_v4(),
            fields,
            requested_at,
        };

        self.collections
            .write()
            .await
            .entry(collection)
            .or_default()
            .push(document.clone());

        document
    }

    /// Returns whether a document was removed.
    pub async fn remove(&self, collection: Collection, id: Uuid) -> bool {
        let mut collections = self.collections.write().await;
        let Some(documents) = collections.get_mut(&collection) else {
            return false;
        };

        let before = documents.len();
        documents.retain(|doc| doc.id != id);
        documents.len() != before
    }

    pub async fn counts(&self) -> Vec<(Collection, usize)> {
        let collections = self.collections.read().await;
        Collection::ALL
            .iter()
            .map(|c| (*c, collections.get(c).map_or(0, Vec::len)))
            .collect()
    }
}
