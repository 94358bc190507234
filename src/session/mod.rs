//! Session & scope resolver.
//!
//! Holds the authenticated identity, its role and the admin's "view as" selection,
//! and derives the effective scope every other component queries with. A change of
//! the effective scope clears the request cache while the write lock is held, so no
//! reader can observe the new scope before the cache is empty.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use crate::cache::RequestCache;
use crate::models::{derive_scope, Identity, Role, ScopeSpec};

/// Broadcast on every effective scope change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChange {
    pub generation: u64,
    /// `None` once the session has been torn down
    pub scope: Option<ScopeSpec>,
}

#[derive(Debug, Default)]
struct SessionState {
    identity: Option<Identity>,
    selection: Option<String>,
    scope: Option<ScopeSpec>,
    generation: u64,
}

/// Explicit session handle shared by stores, the aggregator and the scheduler.
pub struct Session {
    state: RwLock<SessionState>,
    cache: Arc<RequestCache>,
    changes: watch::Sender<ScopeChange>,
}

impl Session {
    /// Start a session for `identity`.
    ///
    /// Users are pinned to their own id; admins start in fetch-all mode.
    pub fn login(identity: Identity, cache: Arc<RequestCache>) -> Arc<Self> {
        let selection = match identity.role {
            Role::User => Some(identity.id.clone()),
            Role::Admin => None,
        };
        let scope = derive_scope(&identity, selection.as_deref());
        tracing::info!(
            user_id = %identity.id,
            role = identity.role.as_str(),
            scope = %scope.label(),
            "session started"
        );

        cache.clear();
        let (changes, _) = watch::channel(ScopeChange {
            generation: 1,
            scope: Some(scope.clone()),
        });

        Arc::new(Self {
            state: RwLock::new(SessionState {
                identity: Some(identity),
                selection,
                scope: Some(scope),
                generation: 1,
            }),
            cache,
            changes,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read().identity.clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.read().identity.as_ref().map(|identity| identity.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    pub fn selected_target_id(&self) -> Option<String> {
        self.read().selection.clone()
    }

    /// Effective scope, or `None` when no identity is signed in.
    pub fn effective_scope(&self) -> Option<ScopeSpec> {
        self.read().scope.clone()
    }

    /// Effective scope together with the generation it belongs to.
    pub fn scoped(&self) -> Option<(ScopeSpec, u64)> {
        let state = self.read();
        state.scope.clone().map(|scope| (scope, state.generation))
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Whether `generation` is still the active scope.
    pub fn is_current(&self, generation: u64) -> bool {
        let state = self.read();
        state.scope.is_some() && state.generation == generation
    }

    pub fn cache(&self) -> &Arc<RequestCache> {
        &self.cache
    }

    pub fn subscribe(&self) -> watch::Receiver<ScopeChange> {
        self.changes.subscribe()
    }

    /// Change the "view as" selection.
    ///
    /// Only admins may select someone other than themselves; for users this is a
    /// no-op. Returns whether the effective scope changed.
    pub fn set_selected_target_id(&self, target: Option<String>) -> bool {
        let change = {
            let mut state = self.write();
            let Some(identity) = state.identity.clone() else {
                tracing::debug!("ignoring selection change without an active session");
                return false;
            };

            if identity.role != Role::Admin {
                if target.as_deref() != Some(identity.id.as_str()) {
                    tracing::debug!(
                        user_id = %identity.id,
                        requested = ?target,
                        "non-admin selection change ignored"
                    );
                }
                return false;
            }

            if state.selection == target {
                return false;
            }

            let scope = derive_scope(&identity, target.as_deref());
            state.selection = target;
            if state.scope.as_ref() == Some(&scope) {
                return false;
            }

            let from = state.scope.as_ref().map(ScopeSpec::label);
            state.generation += 1;
            // Clear before the new scope becomes readable
            self.cache.clear();
            state.scope = Some(scope.clone());
            tracing::info!(
                from = ?from,
                to = %scope.label(),
                generation = state.generation,
                "effective scope changed"
            );

            ScopeChange {
                generation: state.generation,
                scope: Some(scope),
            }
        };

        self.changes.send_replace(change);
        true
    }

    /// Tear the session down: scope becomes unset and every cache is cleared.
    pub fn logout(&self) {
        let change = {
            let mut state = self.write();
            if state.identity.is_none() {
                return;
            }
            state.generation += 1;
            self.cache.clear();
            if let Some(identity) = state.identity.take() {
                tracing::info!(user_id = %identity.id, "session ended");
            }
            state.selection = None;
            state.scope = None;
            ScopeChange {
                generation: state.generation,
                scope: None,
            }
        };

        self.changes.send_replace(change);
    }
}
