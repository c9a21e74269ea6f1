//! Document endpoints shared by the users, products and categories groups.
//!
//! Each group is its own `Router` mounted under a prefix; paths here are
//! relative to that prefix.
//!
//! - `GET /` - list documents
//! - `POST /` - create a document from a JSON object
//! - `GET /{id}` - fetch one document
//! - `DELETE /{id}` - delete one document

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{AppJson, Envelope};
use crate::catalog::{Catalog, Collection, Document};
use crate::error::{AppError, AppResult};
use crate::middleware::RequestedTime;

#[derive(Debug, Clone)]
pub struct ResourceState {
    catalog: Catalog,
    collection: Collection,
}

/// Routes for one collection.
pub fn resource_routes(catalog: Catalog, collection: Collection) -> Router {
    Router::new()
        .route("/", get(list_documents).post(create_document))
        .route("/{id}", get(get_document).delete(delete_document))
        .with_state(ResourceState {
            catalog,
            collection,
        })
}

#[instrument(skip(state), fields(collection = %state.collection))]
async fn list_documents(State(state): State<ResourceState>) -> Json<Envelope<Vec<Document>>> {
    let documents = state.catalog.list(state.collection).await;
    let results = documents.len();
    Json(Envelope::list(documents, results))
}

#[instrument(skip(state), fields(collection = %state.collection))]
async fn get_document(
    State(state): State<ResourceState>,
    Path(id): Path<String>,
) -> AppResult<Json<Envelope<Document>>> {
    let id = parse_id(&id)?;

    state
        .catalog
        .get(state.collection, id)
        .await
        .map(|doc| Json(Envelope::success(doc)))
        .ok_or_else(|| AppError::not_found("No document found with that ID"))
}

#[instrument(skip(state, body), fields(collection = %state.collection))]
async fn create_document(
    State(state): State<ResourceState>,
    requested_time: Option<Extension<RequestedTime>>,
    AppJson(body): AppJson<Value>,
) -> AppResult<(StatusCode, Json<Envelope<Document>>)> {
    let Value::Object(fields) = body else {
        return Err(AppError::bad_request("Request body must be a JSON object"));
    };

    let Extension(RequestedTime(requested_at)) =
        requested_time.unwrap_or_else(|| Extension(RequestedTime::now()));

    let document = state
        .catalog
        .insert(state.collection, fields, requested_at)
        .await;
    debug!(id = %document.id, "Document created");

    Ok((StatusCode::CREATED, Json(Envelope::success(document))))
}

#[instrument(skip(state), fields(collection = %state.collection))]
async fn delete_document(
    State(state): State<ResourceState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id)?;

    if state.catalog.remove(state.collection, id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("No document found with that ID"))
    }
}

fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request(format!("Invalid id: {raw}")))
}
