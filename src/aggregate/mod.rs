//! Team aggregator.
//!
//! Composes every team-view entity list and the team directory into one read
//! model, fetched in parallel with per-branch error isolation. The last complete
//! view is persisted per identity so the next mount can paint immediately.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use futures::future::{join, join_all};
use serde::Serialize;

use crate::db::SnapshotStore;
use crate::errors::SyncError;
use crate::models::{snapshot_key, EntityKind, Record, ScopeSpec, TeamMember, TeamSnapshot};
use crate::remote::{EntityApi, TeamDirectory};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Raises `loading` until every branch settles
    Blocking,
    /// Leaves `loading` untouched
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// Painted from the persisted snapshot; a background fetch should follow
    FromSnapshot,
    /// No usable snapshot; a blocking fetch ran
    Fetched,
}

/// Read model of the team dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamView {
    pub entities: BTreeMap<EntityKind, Vec<Record>>,
    pub team_members: Vec<TeamMember>,
    pub loading: bool,
    pub initial_loading: bool,
    pub scope: Option<ScopeSpec>,
    /// Kinds whose last fetch failed and are shown empty
    pub failed: Vec<EntityKind>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct AggregateState {
    entities: BTreeMap<EntityKind, Vec<Record>>,
    team_members: Vec<TeamMember>,
    loading: bool,
    initial_loading: bool,
    scope: Option<ScopeSpec>,
    failed: Vec<EntityKind>,
    updated_at: Option<DateTime<Utc>>,
    /// Scope generation the lists belong to
    generation: Option<u64>,
    active_load: u64,
}

impl Default for AggregateState {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            team_members: Vec::new(),
            loading: false,
            initial_loading: true,
            scope: None,
            failed: Vec::new(),
            updated_at: None,
            generation: None,
            active_load: 0,
        }
    }
}

pub struct TeamAggregator {
    session: Arc<Session>,
    sources: Vec<(EntityKind, Arc<dyn EntityApi>)>,
    directory: Option<Arc<dyn TeamDirectory>>,
    snapshots: Arc<dyn SnapshotStore>,
    state: RwLock<AggregateState>,
}

impl TeamAggregator {
    pub fn new(session: Arc<Session>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            session,
            sources: Vec::new(),
            directory: None,
            snapshots,
            state: RwLock::new(AggregateState::default()),
        }
    }

    pub fn with_source(mut self, kind: EntityKind, api: Arc<dyn EntityApi>) -> Self {
        self.sources.push((kind, api));
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn TeamDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, AggregateState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AggregateState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn loading(&self) -> bool {
        self.read().loading
    }

    pub fn initial_loading(&self) -> bool {
        self.read().initial_loading
    }

    pub fn view(&self) -> TeamView {
        let state = self.read();
        let current = state
            .generation
            .map(|generation| self.session.is_current(generation))
            .unwrap_or(false);

        let entities = if current {
            state.entities.clone()
        } else {
            BTreeMap::new()
        };

        TeamView {
            entities,
            team_members: state.team_members.clone(),
            loading: state.loading,
            initial_loading: state.initial_loading,
            scope: state.scope.clone(),
            failed: state.failed.clone(),
            updated_at: state.updated_at,
        }
    }

    /// Paint from the persisted snapshot, or run a blocking fetch when there is none.
    pub async fn mount(&self) -> Result<MountOutcome, SyncError> {
        let (identity, generation) = match (self.session.identity(), self.session.scoped()) {
            (Some(identity), Some((_, generation))) => (identity, generation),
            _ => return Err(SyncError::Unauthorized("No active session".to_string())),
        };
        let key = snapshot_key(&identity.id);

        match self.load_snapshot(&key).await {
            Some(snapshot) => {
                let mut state = self.write();
                tracing::info!(
                    key = %key,
                    taken_at = %snapshot.timestamp,
                    scope = ?snapshot.scope.as_ref().map(ScopeSpec::label),
                    "painting team view from snapshot"
                );
                state.entities = snapshot.entities;
                state.team_members = snapshot.team_members;
                state.scope = snapshot.scope;
                state.updated_at = Some(snapshot.timestamp);
                state.failed.clear();
                state.generation = Some(generation);
                state.loading = false;
                state.initial_loading = false;
                Ok(MountOutcome::FromSnapshot)
            }
            None => {
                {
                    let mut state = self.write();
                    state.initial_loading = true;
                }
                self.fetch_all(FetchMode::Blocking).await?;
                Ok(MountOutcome::Fetched)
            }
        }
    }

    async fn load_snapshot(&self, key: &str) -> Option<TeamSnapshot> {
        match self.snapshots.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<TeamSnapshot>(&bytes) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(key, error = %e, "unreadable snapshot, discarding and fetching instead");
                    if let Err(e) = self.snapshots.remove(key).await {
                        tracing::warn!(key, error = %e, "failed to discard unreadable snapshot");
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "snapshot store unavailable");
                None
            }
        }
    }

    /// Drop the previous scope's lists ahead of a refetch.
    pub fn reset_for_scope(&self) {
        let mut state = self.write();
        state.entities.clear();
        state.failed.clear();
        state.scope = None;
        state.generation = None;
    }

    /// Fetch every source in parallel and persist the result.
    ///
    /// A failing branch degrades to an empty list; only a pass where every branch
    /// failed is reported as an error.
    pub async fn fetch_all(&self, mode: FetchMode) -> Result<(), SyncError> {
        let Some((scope, generation)) = self.session.scoped() else {
            return Err(SyncError::Unauthorized("No active session".to_string()));
        };

        let loading_guard = (mode == FetchMode::Blocking).then(|| {
            let mut state = self.write();
            state.active_load += 1;
            state.loading = true;
            LoadingGuard {
                aggregator: self,
                load_id: state.active_load,
            }
        });

        tracing::debug!(scope = %scope.label(), generation, mode = ?mode, "fetching team data");
        let target = scope.target_user_id.as_deref();
        let fetch_all = scope.fetch_all;
        let lists = join_all(self.sources.iter().map(|(kind, api)| async move {
            (*kind, api.get_all(target, fetch_all).await)
        }));
        let members = async {
            match &self.directory {
                Some(directory) => Some(directory.team_members().await),
                None => None,
            }
        };
        let (lists, members) = join(lists, members).await;

        let mut entities = BTreeMap::new();
        let mut failed = Vec::new();
        let mut last_error = None;
        for (kind, result) in lists {
            match result {
                Ok(records) => {
                    entities.insert(kind, records);
                }
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "team fetch failed, showing empty list");
                    entities.insert(kind, Vec::new());
                    failed.push(kind);
                    last_error = Some(e);
                }
            }
        }

        let snapshot = {
            let mut state = self.write();
            if !self.session.is_current(generation) {
                tracing::debug!(generation, "discarding team data of outdated scope");
                return Err(SyncError::ScopeChanged);
            }

            match members {
                Some(Ok(members)) => state.team_members = members,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "team directory fetch failed");
                    state.team_members.clear();
                }
                None => {}
            }
            state.entities = entities;
            state.scope = Some(scope.clone());
            state.generation = Some(generation);
            state.updated_at = Some(Utc::now());
            state.failed = failed.clone();
            state.initial_loading = false;

            tracing::info!(
                scope = %scope.label(),
                failed = failed.len(),
                members = state.team_members.len(),
                "team data fetched"
            );

            TeamSnapshot {
                entities: state.entities.clone(),
                team_members: state.team_members.clone(),
                scope: Some(scope),
                timestamp: Utc::now(),
            }
        };

        drop(loading_guard);

        if !self.sources.is_empty() && failed.len() == self.sources.len() {
            return Err(last_error.unwrap_or_else(|| {
                SyncError::Internal("Every team fetch failed".to_string())
            }));
        }

        self.persist(snapshot).await;
        Ok(())
    }

    async fn persist(&self, snapshot: TeamSnapshot) {
        let Some(identity) = self.session.identity() else {
            return;
        };
        let key = snapshot_key(&identity.id);
        let bytes = match serde_json::to_vec(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode snapshot");
                return;
            }
        };
        if let Err(e) = self.snapshots.set(&key, &bytes).await {
            tracing::warn!(key = %key, error = %e, "failed to persist snapshot");
        }
    }
}

/// Lowers `loading` once a blocking fetch settles, is discarded or is dropped.
struct LoadingGuard<'a> {
    aggregator: &'a TeamAggregator,
    load_id: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.aggregator.write();
        if state.active_load == self.load_id {
            state.loading = false;
            state.initial_loading = false;
        }
    }
}
