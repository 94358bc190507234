//! Optimistic mutation as an explicit apply/rollback command.

use serde_json::{Map, Value};

use crate::models::{Record, RecordId};

#[derive(Debug, Clone)]
enum Action {
    Replace {
        id: RecordId,
        patch: Map<String, Value>,
    },
    Remove {
        id: RecordId,
    },
}

/// Result of rolling a command back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The touched record got its pre-command value back
    Restored,
    /// A fetch landed after the command was applied; server data is kept
    Superseded,
    /// The command was never applied
    NotApplied,
}

/// A local mutation applied ahead of the remote round-trip.
///
/// `apply` remembers only the record it touches, with its position and the
/// store's fetch version. `rollback` puts that one record back, so records added
/// or confirmed by other mutations in the meantime survive. Once a newer fetch
/// has replaced the list the rollback is skipped.
#[derive(Debug, Clone)]
pub struct OptimisticCommand {
    action: Action,
    before: Option<(usize, Record)>,
    applied_at: u64,
}

impl OptimisticCommand {
    pub fn replace(id: RecordId, patch: Map<String, Value>) -> Self {
        Self {
            action: Action::Replace { id, patch },
            before: None,
            applied_at: 0,
        }
    }

    pub fn remove(id: RecordId) -> Self {
        Self {
            action: Action::Remove { id },
            before: None,
            applied_at: 0,
        }
    }

    pub fn id(&self) -> &RecordId {
        match &self.action {
            Action::Replace { id, .. } | Action::Remove { id } => id,
        }
    }

    /// Apply to `records`. Returns whether a local record was touched.
    pub fn apply(&mut self, records: &mut Vec<Record>, fetch_version: u64) -> bool {
        self.applied_at = fetch_version;
        let Some(index) = records.iter().position(|r| r.id == *self.id()) else {
            return false;
        };

        match &self.action {
            Action::Replace { patch, .. } => {
                let patched = records[index].patched(patch);
                self.before = Some((index, std::mem::replace(&mut records[index], patched)));
            }
            Action::Remove { .. } => {
                self.before = Some((index, records.remove(index)));
            }
        }
        true
    }

    pub fn rollback(self, records: &mut Vec<Record>, fetch_version: u64) -> RollbackOutcome {
        let Some((index, previous)) = self.before else {
            return RollbackOutcome::NotApplied;
        };
        if fetch_version != self.applied_at {
            return RollbackOutcome::Superseded;
        }

        match records.iter().position(|r| r.id == previous.id) {
            Some(current) => records[current] = previous,
            None => records.insert(index.min(records.len()), previous),
        }
        RollbackOutcome::Restored
    }
}
