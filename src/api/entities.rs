//! Entity store API endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

use super::{error, success, ApiResult};
use crate::errors::{ApiError, SyncError};
use crate::models::{EntityKind, Record, RecordId};
use crate::store::{EntityStore, StoreView};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedRecord {
    pub id: RecordId,
}

fn store_for(state: &AppState, slug: &str) -> Result<Arc<EntityStore>, ApiError> {
    EntityKind::from_slug(slug)
        .and_then(|kind| state.engine.store(kind).cloned())
        .ok_or_else(|| ApiError {
            error: SyncError::NotFound(format!("Unknown entity kind: {}", slug)),
            scope_generation: state.engine.session().generation(),
        })
}

fn object(body: Value, generation: u64) -> Result<Map<String, Value>, ApiError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError {
            error: SyncError::BadRequest("Request body must be a JSON object".to_string()),
            scope_generation: generation,
        }),
    }
}

/// GET /api/entities/:kind - Records of the current scope.
pub async fn list_records(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<StoreView> {
    let store = store_for(&state, &kind)?;
    success(store.view(), state.engine.session().generation())
}

/// POST /api/entities/:kind - Create a record.
pub async fn create_record(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Record> {
    let store = store_for(&state, &kind)?;
    let generation = state.engine.session().generation();
    let input = object(body, generation)?;

    if input.is_empty() {
        return error(
            SyncError::Validation("At least one field is required".to_string()),
            generation,
        );
    }

    match store.create(input).await {
        Ok(record) => success(record, generation),
        Err(e) => error(e, generation),
    }
}

/// PUT /api/entities/:kind/:id - Optimistically update a record.
pub async fn update_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Record> {
    let store = store_for(&state, &kind)?;
    let generation = state.engine.session().generation();
    let patch = object(body, generation)?;

    match store.update(RecordId::parse(&id), patch).await {
        Ok(record) => success(record, generation),
        Err(e) => error(e, generation),
    }
}

/// DELETE /api/entities/:kind/:id - Optimistically delete a record.
pub async fn delete_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<DeletedRecord> {
    let store = store_for(&state, &kind)?;
    let generation = state.engine.session().generation();
    let id = RecordId::parse(&id);

    match store.remove(id.clone()).await {
        Ok(()) => success(DeletedRecord { id }, generation),
        Err(e) => error(e, generation),
    }
}

/// POST /api/entities/:kind/refresh - Reload one store.
pub async fn refresh_records(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<StoreView> {
    let store = store_for(&state, &kind)?;

    match store.load().await {
        Ok(()) => success(store.view(), state.engine.session().generation()),
        Err(e) => error(e, state.engine.session().generation()),
    }
}
