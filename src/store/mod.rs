//! Generic entity store with optimistic mutations.
//!
//! One store per entity kind. Reads are keyed implicitly by the session's scope
//! generation: results fetched under an older generation are discarded, and a
//! list tagged with an older generation is never returned.

mod command;

pub use command::*;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::SyncError;
use crate::models::{sanitize_input, EntityKind, MutationMessages, Record, RecordId};
use crate::notify::Notifier;
use crate::remote::EntityApi;
use crate::session::Session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorePhase {
    #[default]
    Idle,
    Loading,
    Ready,
}

/// Read model of one store, as served by the local API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreView {
    pub kind: EntityKind,
    pub records: Vec<Record>,
    pub loading: bool,
    pub phase: StorePhase,
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<Record>,
    loading: bool,
    phase: StorePhase,
    /// Scope generation `records` were fetched under
    generation: Option<u64>,
    /// Bumped whenever a fetch or reset replaces `records`
    fetch_version: u64,
    /// Id of the load that currently owns `loading`
    active_load: u64,
}

pub struct EntityStore {
    kind: EntityKind,
    api: Arc<dyn EntityApi>,
    session: Arc<Session>,
    messages: MutationMessages,
    notifier: Arc<dyn Notifier>,
    state: RwLock<StoreState>,
}

impl EntityStore {
    pub fn new(
        kind: EntityKind,
        api: Arc<dyn EntityApi>,
        session: Arc<Session>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            kind,
            api,
            session,
            messages: kind.messages(),
            notifier,
            state: RwLock::new(StoreState::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Records of the last successful fetch for the current scope.
    pub fn list(&self) -> Vec<Record> {
        let state = self.read();
        match state.generation {
            Some(generation) if self.session.is_current(generation) => state.records.clone(),
            _ => Vec::new(),
        }
    }

    pub fn loading(&self) -> bool {
        self.read().loading
    }

    pub fn phase(&self) -> StorePhase {
        self.read().phase
    }

    pub fn view(&self) -> StoreView {
        let records = self.list();
        let state = self.read();
        StoreView {
            kind: self.kind,
            records,
            loading: state.loading,
            phase: state.phase,
        }
    }

    /// Drop every record; the next fetch starts from `Idle`.
    pub fn reset(&self) {
        let mut state = self.write();
        state.records.clear();
        state.generation = None;
        state.loading = false;
        state.phase = StorePhase::Idle;
        state.fetch_version += 1;
    }

    /// Triggering fetch: `loading` is raised until it settles.
    pub async fn load(&self) -> Result<(), SyncError> {
        self.fetch(true).await
    }

    /// Background fetch for polling; never touches `loading`.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.fetch(false).await
    }

    async fn fetch(&self, show_loading: bool) -> Result<(), SyncError> {
        let Some((scope, generation)) = self.session.scoped() else {
            self.reset();
            return Err(SyncError::Unauthorized("No active session".to_string()));
        };

        let _loading = show_loading.then(|| {
            let mut state = self.write();
            state.active_load += 1;
            state.loading = true;
            state.phase = StorePhase::Loading;
            LoadingGuard {
                store: self,
                load_id: state.active_load,
            }
        });

        tracing::debug!(kind = %self.kind, scope = %scope.label(), generation, "fetching records");
        let result = self
            .api
            .get_all(scope.target_user_id.as_deref(), scope.fetch_all)
            .await;

        let mut state = self.write();
        if !self.session.is_current(generation) {
            tracing::debug!(kind = %self.kind, generation, "discarding result of outdated scope");
            return Err(SyncError::ScopeChanged);
        }

        state.generation = Some(generation);
        state.fetch_version += 1;
        state.phase = StorePhase::Ready;
        match result {
            Ok(records) => {
                tracing::debug!(kind = %self.kind, count = records.len(), "records loaded");
                state.records = records;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, "fetch failed, showing empty list");
                state.records.clear();
                Err(e)
            }
        }
    }

    /// Owner to route a mutation of `id` to.
    ///
    /// The local record's `_userId` wins; otherwise the effective target. In
    /// fetch-all mode without a local record this is `None` and the remote decides.
    pub fn resolve_owner(&self, id: &RecordId) -> Option<String> {
        let local = self
            .list()
            .into_iter()
            .find(|record| &record.id == id)
            .and_then(|record| record.owner_id);
        local.or_else(|| {
            self.session
                .effective_scope()
                .and_then(|scope| scope.target_user_id)
        })
    }

    fn require_session(&self) -> Result<u64, SyncError> {
        self.session
            .scoped()
            .map(|(_, generation)| generation)
            .ok_or_else(|| SyncError::Unauthorized("No active session".to_string()))
    }

    /// Create a record. Nothing is appended until the remote returns it.
    pub async fn create(&self, input: Map<String, Value>) -> Result<Record, SyncError> {
        let generation = self.require_session()?;
        let input = sanitize_input(input);

        match self.api.create(&input).await {
            Ok(record) => {
                {
                    let mut state = self.write();
                    if state.generation == Some(generation) && self.session.is_current(generation) {
                        state.records.push(record.clone());
                    }
                }
                tracing::info!(kind = %self.kind, id = %record.id, "record created");
                self.notifier.success(&self.messages.create);
                Ok(record)
            }
            Err(e) => {
                self.notifier
                    .error(&e.user_message(&format!("Failed to create {}", self.kind.label())));
                Err(e)
            }
        }
    }

    /// Optimistically patch a record, rolling back if the remote rejects it.
    pub async fn update(&self, id: RecordId, patch: Map<String, Value>) -> Result<Record, SyncError> {
        let generation = self.require_session()?;
        let patch = sanitize_input(patch);
        let owner = self.resolve_owner(&id);

        let mut command = OptimisticCommand::replace(id.clone(), patch.clone());
        self.apply(&mut command);

        match self.api.update(&id, &patch, owner.as_deref()).await {
            Ok(record) => {
                {
                    let mut state = self.write();
                    if self.session.is_current(generation) {
                        if let Some(slot) = state.records.iter_mut().find(|r| r.id == id) {
                            *slot = record.clone();
                        }
                    }
                }
                tracing::info!(kind = %self.kind, id = %id, owner = ?owner, "record updated");
                self.notifier.success(&self.messages.update);
                Ok(record)
            }
            Err(e) => {
                self.rollback(command, &e);
                self.notifier
                    .error(&e.user_message(&format!("Failed to update {}", self.kind.label())));
                Err(e)
            }
        }
    }

    /// Optimistically remove a record, restoring the list if the remote rejects it.
    pub async fn remove(&self, id: RecordId) -> Result<(), SyncError> {
        self.require_session()?;
        let owner = self.resolve_owner(&id);

        let mut command = OptimisticCommand::remove(id.clone());
        self.apply(&mut command);

        match self.api.delete(&id, owner.as_deref()).await {
            Ok(()) => {
                tracing::info!(kind = %self.kind, id = %id, owner = ?owner, "record deleted");
                self.notifier.success(&self.messages.delete);
                Ok(())
            }
            Err(e) => {
                self.rollback(command, &e);
                self.notifier
                    .error(&e.user_message(&format!("Failed to delete {}", self.kind.label())));
                Err(e)
            }
        }
    }

    fn apply(&self, command: &mut OptimisticCommand) {
        let mut state = self.write();
        let version = state.fetch_version;
        if !command.apply(&mut state.records, version) {
            tracing::debug!(kind = %self.kind, id = %command.id(), "no local record to update optimistically");
        }
    }

    fn rollback(&self, command: OptimisticCommand, error: &SyncError) {
        let id = command.id().clone();
        let mut state = self.write();
        let version = state.fetch_version;
        let outcome = command.rollback(&mut state.records, version);
        tracing::warn!(kind = %self.kind, id = %id, error = %error, outcome = ?outcome, "mutation failed, rolling back");
    }
}

/// Lowers `loading` when a triggering fetch settles or is dropped mid-flight.
struct LoadingGuard<'a> {
    store: &'a EntityStore,
    load_id: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.store.write();
        if state.active_load != self.load_id {
            return;
        }
        state.loading = false;
        if state.phase == StorePhase::Loading {
            let current = state
                .generation
                .is_some_and(|generation| self.store.session.is_current(generation));
            state.phase = if current {
                StorePhase::Ready
            } else {
                StorePhase::Idle
            };
        }
    }
}
