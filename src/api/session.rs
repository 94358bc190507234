//! Session API endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::cache::CacheStats;
use crate::models::{Identity, ScopeSpec};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub identity: Option<Identity>,
    pub selected_target_id: Option<String>,
    pub scope: Option<ScopeSpec>,
    pub cache: CacheStats,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    #[serde(default)]
    pub target_user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    pub changed: bool,
    pub session: SessionInfo,
}

fn session_info(state: &AppState) -> SessionInfo {
    let session = state.engine.session();
    SessionInfo {
        identity: session.identity(),
        selected_target_id: session.selected_target_id(),
        scope: session.effective_scope(),
        cache: session.cache().stats(),
    }
}

/// GET /api/session - Current identity and effective scope.
pub async fn get_session(State(state): State<AppState>) -> ApiResult<SessionInfo> {
    let generation = state.engine.session().generation();
    success(session_info(&state), generation)
}

/// PUT /api/session/selection - Change the admin's "view as" selection.
///
/// Waits for the reload under the new scope. Non-admins get `changed: false`.
pub async fn put_selection(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> ApiResult<SelectionResult> {
    let target = request
        .target_user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    match state.engine.select(target).await {
        Ok(changed) => {
            let generation = state.engine.session().generation();
            success(
                SelectionResult {
                    changed,
                    session: session_info(&state),
                },
                generation,
            )
        }
        Err(e) => error(e, state.engine.session().generation()),
    }
}
