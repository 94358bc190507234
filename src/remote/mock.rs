//! In-memory mock backend for tests without a real dashboard API.
//!
//! Honors the remote contract: fetch-all reads return every member's records with
//! ownership metadata, single-member reads filter exactly, and mutations with a
//! mismatched owner are rejected. Supports failure injection, a read gate to hold
//! `get_all` calls open, and a call log.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::{EntityApi, TeamDirectory};
use crate::cache::RequestCache;
use crate::errors::SyncError;
use crate::models::{EntityKind, Record, RecordId, Role, TeamMember};

/// A call observed by the mock backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    GetAll {
        kind: EntityKind,
        target_user_id: Option<String>,
        fetch_all: bool,
        /// Request cache epoch at the time of the read, when a cache is observed
        cache_epoch: Option<u64>,
    },
    Create {
        kind: EntityKind,
    },
    Update {
        kind: EntityKind,
        id: RecordId,
        owner_id: Option<String>,
    },
    Delete {
        kind: EntityKind,
        id: RecordId,
        owner_id: Option<String>,
    },
}

#[derive(Default)]
struct MockState {
    members: Vec<TeamMember>,
    records: BTreeMap<EntityKind, Vec<Record>>,
    failing_reads: HashSet<EntityKind>,
    failing_mutations: HashSet<EntityKind>,
    calls: Vec<MockCall>,
    next_id: i64,
}

/// Shared in-memory team backend.
pub struct MockBackend {
    state: Mutex<MockState>,
    gate: watch::Sender<bool>,
    observed_cache: Mutex<Option<Arc<RequestCache>>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            state: Mutex::new(MockState {
                next_id: 1000,
                ..MockState::default()
            }),
            gate,
            observed_cache: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_member(&self, id: &str, name: &str, role: Role) {
        self.lock().members.push(TeamMember {
            id: id.to_string(),
            name: name.to_string(),
            email: None,
            role,
            team_id: Some("team-1".to_string()),
        });
    }

    /// Seed `count` records of `kind` owned by `owner`.
    pub fn seed(&self, kind: EntityKind, owner: &str, count: usize) {
        let mut state = self.lock();
        let owner_name = member_name(&state.members, owner);
        for n in 0..count {
            state.next_id += 1;
            let mut fields = Map::new();
            fields.insert("title".to_string(), Value::String(format!("{} #{}", owner, n)));
            let record = Record {
                id: RecordId::Number(state.next_id),
                owner_id: Some(owner.to_string()),
                owner_name: owner_name.clone(),
                fields,
            };
            state.records.entry(kind).or_default().push(record);
        }
    }

    pub fn records(&self, kind: EntityKind) -> Vec<Record> {
        self.lock().records.get(&kind).cloned().unwrap_or_default()
    }

    pub fn fail_reads(&self, kind: EntityKind) {
        self.lock().failing_reads.insert(kind);
    }

    pub fn fail_mutations(&self, kind: EntityKind) {
        self.lock().failing_mutations.insert(kind);
    }

    pub fn heal(&self) {
        let mut state = self.lock();
        state.failing_reads.clear();
        state.failing_mutations.clear();
    }

    /// Hold every subsequent `get_all` until [`MockBackend::release_reads`].
    pub fn hold_reads(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.gate.send_replace(true);
    }

    /// Record the cache epoch on every read.
    pub fn observe_cache(&self, cache: Arc<RequestCache>) {
        *self
            .observed_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cache);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn reads(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, MockCall::GetAll { .. }))
            .collect()
    }

    /// Collaborator for `kind`, acting as `acting_user` for creates.
    pub fn api(self: &Arc<Self>, kind: EntityKind, acting_user: &str) -> Arc<MockEntityApi> {
        Arc::new(MockEntityApi {
            backend: Arc::clone(self),
            kind,
            acting_user: acting_user.to_string(),
        })
    }

    fn cache_epoch(&self) -> Option<u64> {
        self.observed_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|cache| cache.epoch())
    }
}

fn member_name(members: &[TeamMember], id: &str) -> Option<String> {
    members
        .iter()
        .find(|member| member.id == id)
        .map(|member| member.name.clone())
}

#[async_trait]
impl TeamDirectory for MockBackend {
    async fn team_members(&self) -> Result<Vec<TeamMember>, SyncError> {
        Ok(self.lock().members.clone())
    }
}

/// [`EntityApi`] view of the mock backend for one entity kind.
pub struct MockEntityApi {
    backend: Arc<MockBackend>,
    kind: EntityKind,
    acting_user: String,
}

impl MockEntityApi {
    fn check_mutation(&self, state: &MockState) -> Result<(), SyncError> {
        if state.failing_mutations.contains(&self.kind) {
            return Err(SyncError::Remote {
                status: 500,
                message: format!("Failed to write {}", self.kind.label()),
            });
        }
        Ok(())
    }

    fn find_owned<'a>(
        &self,
        state: &'a mut MockState,
        id: &RecordId,
        owner_id: Option<&str>,
    ) -> Result<(&'a mut Vec<Record>, usize), SyncError> {
        let list = state.records.entry(self.kind).or_default();
        let index = list
            .iter()
            .position(|record| &record.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("Record {} not found", id)))?;
        if list[index].owner_id.as_deref() != owner_id {
            return Err(SyncError::Forbidden(format!(
                "Record {} does not belong to {}",
                id,
                owner_id.unwrap_or("<none>")
            )));
        }
        Ok((list, index))
    }
}

#[async_trait]
impl EntityApi for MockEntityApi {
    async fn get_all(
        &self,
        target_user_id: Option<&str>,
        fetch_all: bool,
    ) -> Result<Vec<Record>, SyncError> {
        {
            let mut state = self.backend.lock();
            let cache_epoch = self.backend.cache_epoch();
            state.calls.push(MockCall::GetAll {
                kind: self.kind,
                target_user_id: target_user_id.map(str::to_string),
                fetch_all,
                cache_epoch,
            });
        }

        let mut gate = self.backend.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let state = self.backend.lock();
        if state.failing_reads.contains(&self.kind) {
            return Err(SyncError::Remote {
                status: 500,
                message: format!("Failed to load {}", self.kind.label()),
            });
        }
        let records = state.records.get(&self.kind).cloned().unwrap_or_default();
        if fetch_all {
            return Ok(records);
        }
        Ok(records
            .into_iter()
            .filter(|record| record.owner_id.as_deref() == target_user_id)
            .collect())
    }

    async fn create(&self, input: &Map<String, Value>) -> Result<Record, SyncError> {
        let mut state = self.backend.lock();
        state.calls.push(MockCall::Create { kind: self.kind });
        self.check_mutation(&state)?;

        let record = Record {
            id: RecordId::Text(uuid::Uuid::new_v4().to_string()),
            owner_id: Some(self.acting_user.clone()),
            owner_name: member_name(&state.members, &self.acting_user),
            fields: input.clone(),
        };
        state
            .records
            .entry(self.kind)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        id: &RecordId,
        patch: &Map<String, Value>,
        owner_id: Option<&str>,
    ) -> Result<Record, SyncError> {
        let mut state = self.backend.lock();
        state.calls.push(MockCall::Update {
            kind: self.kind,
            id: id.clone(),
            owner_id: owner_id.map(str::to_string),
        });
        self.check_mutation(&state)?;

        let (list, index) = self.find_owned(&mut state, id, owner_id)?;
        let mut updated = list[index].patched(patch);
        updated
            .fields
            .insert("updatedBy".to_string(), Value::String("server".to_string()));
        list[index] = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, id: &RecordId, owner_id: Option<&str>) -> Result<(), SyncError> {
        let mut state = self.backend.lock();
        state.calls.push(MockCall::Delete {
            kind: self.kind,
            id: id.clone(),
            owner_id: owner_id.map(str::to_string),
        });
        self.check_mutation(&state)?;

        let (list, index) = self.find_owned(&mut state, id, owner_id)?;
        list.remove(index);
        Ok(())
    }
}
