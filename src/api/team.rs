//! Team view, sync status and notification endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::{success, ApiResult};
use crate::aggregate::TeamView;
use crate::notify::Notice;
use crate::scheduler::{RefreshOutcome, SyncStatus};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResult {
    pub outcome: RefreshOutcome,
    pub status: SyncStatus,
}

#[derive(Debug, Deserialize)]
pub struct ActivityRequest {
    pub active: bool,
}

/// GET /api/team - Aggregated team view.
pub async fn get_team(State(state): State<AppState>) -> ApiResult<TeamView> {
    success(
        state.engine.aggregator().view(),
        state.engine.session().generation(),
    )
}

/// POST /api/team/refresh - Manual refresh; dropped while one is running.
pub async fn refresh_team(State(state): State<AppState>) -> ApiResult<RefreshResult> {
    let outcome = state.engine.refresh().await;
    success(
        RefreshResult {
            outcome,
            status: state.engine.sync_status(),
        },
        state.engine.session().generation(),
    )
}

/// GET /api/sync - Sync indicator.
pub async fn get_sync_status(State(state): State<AppState>) -> ApiResult<SyncStatus> {
    success(state.engine.sync_status(), state.engine.session().generation())
}

/// POST /api/activity - Report user activity.
pub async fn post_activity(
    State(state): State<AppState>,
    Json(request): Json<ActivityRequest>,
) -> ApiResult<SyncStatus> {
    if request.active {
        state.engine.activity().record_activity();
    } else {
        state.engine.activity().mark_inactive();
    }
    success(state.engine.sync_status(), state.engine.session().generation())
}

/// GET /api/notifications - Recent success and error notices.
pub async fn list_notifications(State(state): State<AppState>) -> ApiResult<Vec<Notice>> {
    success(state.notices.recent(), state.engine.session().generation())
}
