//! Read-only summary group mounted at `/api/v1/reports`.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tracing::instrument;

use super::Envelope;
use crate::catalog::Catalog;

pub fn report_routes(catalog: Catalog) -> Router {
    Router::new()
        .route("/", get(collection_counts))
        .with_state(catalog)
}

/// Document count per collection.
#[instrument(skip(catalog))]
async fn collection_counts(
    State(catalog): State<Catalog>,
) -> Json<Envelope<BTreeMap<&'static str, usize>>> {
    let counts = catalog
        .counts()
        .await
        .into_iter()
        .map(|(collection, count)| (collection.name(), count))
        .collect();

    Json(Envelope::success(counts))
}
