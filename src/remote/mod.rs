//! Remote persistence collaborators.
//!
//! The dashboard backend owns the records; the sync core only talks to it through
//! these traits. `get_all` must honor `fetch_all` by ignoring `target_user_id` and
//! returning every team member's records annotated with `_userId`/`_userName`;
//! `update`/`delete` must reject a mismatched `owner_id`.

mod http;
#[cfg(test)]
pub mod mock;

pub use http::*;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::SyncError;
use crate::models::{Record, RecordId, TeamMember};

/// CRUD endpoints for one entity kind.
#[async_trait]
pub trait EntityApi: Send + Sync {
    async fn get_all(
        &self,
        target_user_id: Option<&str>,
        fetch_all: bool,
    ) -> Result<Vec<Record>, SyncError>;

    async fn create(&self, input: &Map<String, Value>) -> Result<Record, SyncError>;

    async fn update(
        &self,
        id: &RecordId,
        patch: &Map<String, Value>,
        owner_id: Option<&str>,
    ) -> Result<Record, SyncError>;

    async fn delete(&self, id: &RecordId, owner_id: Option<&str>) -> Result<(), SyncError>;
}

/// Lists the members of the signed-in identity's team.
#[async_trait]
pub trait TeamDirectory: Send + Sync {
    async fn team_members(&self) -> Result<Vec<TeamMember>, SyncError>;
}
