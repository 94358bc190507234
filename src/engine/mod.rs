//! Sync engine.
//!
//! Owns the session, one store per entity kind, the team aggregator and the
//! polling scheduler, and runs the reload sequence on every effective scope
//! change: stop the scheduler, drop and refetch every list under the new scope,
//! then start a fresh scheduler.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use futures::future::{join, join_all};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{FetchMode, MountOutcome, TeamAggregator};
use crate::db::SnapshotStore;
use crate::errors::SyncError;
use crate::models::EntityKind;
use crate::notify::Notifier;
use crate::remote::{EntityApi, TeamDirectory};
use crate::scheduler::{
    ActivitySource, ActivityTracker, FetchFn, PollConfig, PollingScheduler, RefreshOutcome,
    SyncState, SyncStatus,
};
use crate::session::{ScopeChange, Session};
use crate::store::EntityStore;

/// Upper bound on waiting for a scope change to be applied.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SyncEngine {
    session: Arc<Session>,
    stores: BTreeMap<EntityKind, Arc<EntityStore>>,
    aggregator: Arc<TeamAggregator>,
    activity: Arc<ActivityTracker>,
    poll: PollConfig,
    scheduler: Mutex<Option<Arc<PollingScheduler>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    applied: watch::Sender<u64>,
    shutdown: CancellationToken,
}

impl SyncEngine {
    /// Wire a store for every entity kind and an aggregator over the team view.
    pub fn new(
        session: Arc<Session>,
        mut api_for: impl FnMut(EntityKind) -> Arc<dyn EntityApi>,
        directory: Arc<dyn TeamDirectory>,
        snapshots: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        poll: PollConfig,
    ) -> Arc<Self> {
        let mut stores = BTreeMap::new();
        let mut aggregator = TeamAggregator::new(session.clone(), snapshots).with_directory(directory);

        for kind in EntityKind::ALL {
            let api = api_for(kind);
            if EntityKind::TEAM_VIEW.contains(&kind) {
                aggregator = aggregator.with_source(kind, api.clone());
            }
            let store = EntityStore::new(kind, api, session.clone(), notifier.clone());
            stores.insert(kind, Arc::new(store));
        }

        let (applied, _) = watch::channel(0);
        Arc::new(Self {
            session,
            stores,
            aggregator: Arc::new(aggregator),
            activity: Arc::new(ActivityTracker::new()),
            poll,
            scheduler: Mutex::new(None),
            watcher: Mutex::new(None),
            applied,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn store(&self, kind: EntityKind) -> Option<&Arc<EntityStore>> {
        self.stores.get(&kind)
    }

    pub fn aggregator(&self) -> &Arc<TeamAggregator> {
        &self.aggregator
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    /// Mount the team view, load every store, start polling and watch the scope.
    pub async fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        let generation = self.session.generation();
        let mut changes = self.session.subscribe();

        match self.aggregator.mount().await {
            Ok(MountOutcome::FromSnapshot) => tracing::info!("team view restored from snapshot"),
            Ok(MountOutcome::Fetched) => tracing::info!("team view fetched"),
            Err(SyncError::Unauthorized(message)) => return Err(SyncError::Unauthorized(message)),
            Err(e) => tracing::warn!(error = %e, "team view mount incomplete"),
        }
        self.load_stores().await;

        self.applied.send_replace(generation);
        self.start_scheduler();

        let engine = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let watcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let change = changes.borrow_and_update().clone();
                        engine.on_scope_change(change).await;
                    }
                }
            }
            tracing::debug!("scope watcher stopped");
        });
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(watcher);

        tracing::info!(
            stores = self.stores.len(),
            polling = self.poll.enabled,
            interval_ms = self.poll.interval.as_millis() as u64,
            "sync engine started"
        );
        Ok(())
    }

    async fn load_stores(&self) {
        let results = join_all(self.stores.values().map(|store| async move {
            (store.kind(), store.load().await)
        }))
        .await;
        for (kind, result) in results {
            if let Err(e) = result {
                tracing::warn!(kind = %kind, error = %e, "initial load failed");
            }
        }
    }

    async fn on_scope_change(self: &Arc<Self>, change: ScopeChange) {
        self.stop_scheduler();

        for store in self.stores.values() {
            store.reset();
        }
        self.aggregator.reset_for_scope();

        let Some(scope) = change.scope else {
            tracing::info!("session ended, sync paused");
            self.applied.send_replace(change.generation);
            return;
        };

        tracing::info!(scope = %scope.label(), generation = change.generation, "reloading for new scope");
        let (aggregate, ()) = join(
            self.aggregator.fetch_all(FetchMode::Blocking),
            self.load_stores(),
        )
        .await;
        if let Err(e) = aggregate {
            tracing::warn!(error = %e, "team view reload incomplete");
        }

        if !self.session.is_current(change.generation) {
            // A newer change is queued on the watcher
            return;
        }
        self.applied.send_replace(change.generation);
        self.start_scheduler();
    }

    /// One background refresh of the team view and every store.
    pub async fn poll_once(&self) -> Result<(), SyncError> {
        let (aggregate, stores) = join(
            self.aggregator.fetch_all(FetchMode::Background),
            join_all(self.stores.values().map(|store| store.refresh())),
        )
        .await;

        let mut first_error = None;
        for result in std::iter::once(aggregate).chain(stores) {
            match result {
                Ok(()) => {}
                Err(SyncError::ScopeChanged) => return Err(SyncError::ScopeChanged),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fetch_fn(self: &Arc<Self>) -> FetchFn {
        let engine: Weak<Self> = Arc::downgrade(self);
        Arc::new(move || {
            let engine = engine.clone();
            async move {
                match engine.upgrade() {
                    Some(engine) => engine.poll_once().await,
                    None => Ok(()),
                }
            }
            .boxed()
        })
    }

    fn start_scheduler(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let activity: Arc<dyn ActivitySource> = self.activity.clone();
        let scheduler = Arc::new(PollingScheduler::start(self.fetch_fn(), self.poll, activity));
        let previous = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(scheduler);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    fn stop_scheduler(&self) {
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.stop();
        }
    }

    fn current_scheduler(&self) -> Option<Arc<PollingScheduler>> {
        self.scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Manual refresh through the scheduler's overlap guard.
    pub async fn refresh(&self) -> RefreshOutcome {
        match self.current_scheduler() {
            Some(scheduler) => scheduler.refresh().await,
            None => match self.poll_once().await {
                Ok(()) => RefreshOutcome::Completed,
                Err(SyncError::ScopeChanged) => RefreshOutcome::Discarded,
                Err(_) => RefreshOutcome::Failed,
            },
        }
    }

    pub fn sync_status(&self) -> SyncStatus {
        match self.current_scheduler() {
            Some(scheduler) => scheduler.status(),
            None => SyncStatus {
                state: SyncState::Syncing,
                is_refreshing: false,
                last_update: None,
                last_error: None,
                polling: false,
                interval_ms: self.poll.interval.as_millis() as u64,
                active: self.activity.is_active(),
                suggested_interval_ms: self.activity.suggested_interval().as_millis() as u64,
            },
        }
    }

    /// Change the admin's "view as" selection and wait until the reload for the
    /// new scope has been applied. Returns whether the scope changed.
    pub async fn select(&self, target: Option<String>) -> Result<bool, SyncError> {
        if !self.session.set_selected_target_id(target) {
            return Ok(false);
        }
        let generation = self.session.generation();
        let mut applied = self.applied.subscribe();
        let waited = tokio::time::timeout(SETTLE_TIMEOUT, applied.wait_for(|g| *g >= generation))
            .await
            .map(|settled| settled.map(|_| ()));
        match waited {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(_)) => Err(SyncError::Internal("Sync engine stopped".to_string())),
            Err(_) => {
                tracing::warn!(generation, "scope reload still running");
                Ok(true)
            }
        }
    }

    /// Stop polling and the scope watcher, then end the session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }

        let watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }

        self.session.logout();
        tracing::info!("sync engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RequestCache;
    use crate::db::MemorySnapshotStore;
    use crate::models::{Identity, Role, ScopeSpec};
    use crate::notify::NoticeBoard;
    use crate::remote::mock::{MockBackend, MockCall};

    fn engine(identity: Identity, poll: PollConfig) -> (Arc<MockBackend>, Arc<SyncEngine>) {
        let backend = MockBackend::new();
        backend.add_member("admin-1", "Alex Admin", Role::Admin);
        backend.add_member("user-1", "Uma User", Role::User);
        backend.add_member("user-2", "Sam Seller", Role::User);

        let cache = Arc::new(RequestCache::default());
        backend.observe_cache(cache.clone());
        let acting = identity.id.clone();
        let session = Session::login(identity, cache);
        let api_backend = backend.clone();
        let engine = SyncEngine::new(
            session,
            move |kind| api_backend.api(kind, &acting) as Arc<dyn EntityApi>,
            backend.clone(),
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(NoticeBoard::default()),
            poll,
        );
        (backend, engine)
    }

    fn quiet() -> PollConfig {
        PollConfig {
            enabled: true,
            interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_start_loads_every_store_and_the_team_view() {
        let (backend, engine) = engine(Identity::new("admin-1", Role::Admin, "team-1"), quiet());
        backend.seed(EntityKind::Tasks, "user-1", 3);
        backend.seed(EntityKind::Tasks, "user-2", 5);
        backend.seed(EntityKind::MyProducts, "admin-1", 1);

        engine.start().await.unwrap();

        let tasks = engine.store(EntityKind::Tasks).unwrap().list();
        assert_eq!(tasks.len(), 8);
        assert_eq!(engine.store(EntityKind::MyProducts).unwrap().list().len(), 1);
        let view = engine.aggregator().view();
        assert_eq!(view.entities[&EntityKind::Tasks].len(), 8);
        assert!(!view.entities.contains_key(&EntityKind::MyProducts));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_scope_change_clears_cache_before_refetch() {
        let (backend, engine) = engine(Identity::new("admin-1", Role::Admin, "team-1"), quiet());
        backend.seed(EntityKind::Debt, "user-1", 2);
        backend.seed(EntityKind::Debt, "user-2", 3);
        engine.start().await.unwrap();
        let epoch = engine.session().cache().epoch();

        assert!(engine.select(Some("user-2".to_string())).await.unwrap());

        let debt = engine.store(EntityKind::Debt).unwrap().list();
        assert_eq!(debt.len(), 3);
        assert!(debt.iter().all(|r| r.owner_id.as_deref() == Some("user-2")));
        assert_eq!(
            engine.aggregator().view().scope,
            Some(ScopeSpec::member("user-2"))
        );

        // Every read issued for the new scope saw the cleared cache
        let scoped_reads: Vec<_> = backend
            .reads()
            .into_iter()
            .filter(|call| {
                matches!(call, MockCall::GetAll { target_user_id: Some(id), .. } if id == "user-2")
            })
            .collect();
        assert!(!scoped_reads.is_empty());
        assert!(scoped_reads.iter().all(|call| matches!(
            call,
            MockCall::GetAll { cache_epoch: Some(e), fetch_all: false, .. } if *e > epoch
        )));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_admin_selection_is_ignored() {
        let (backend, engine) = engine(Identity::new("user-1", Role::User, "team-1"), quiet());
        backend.seed(EntityKind::Kpi, "user-1", 1);
        backend.seed(EntityKind::Kpi, "user-2", 4);
        engine.start().await.unwrap();

        assert!(!engine.select(Some("user-2".to_string())).await.unwrap());
        let kpi = engine.store(EntityKind::Kpi).unwrap().list();
        assert_eq!(kpi.len(), 1);
        assert_eq!(kpi[0].owner_id.as_deref(), Some("user-1"));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_polling_picks_up_remote_changes() {
        let (backend, engine) = engine(
            Identity::new("admin-1", Role::Admin, "team-1"),
            PollConfig {
                enabled: true,
                interval: Duration::from_millis(20),
            },
        );
        engine.start().await.unwrap();
        assert!(engine.store(EntityKind::Competitors).unwrap().list().is_empty());

        backend.seed(EntityKind::Competitors, "user-2", 2);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(engine.store(EntityKind::Competitors).unwrap().list().len(), 2);
        assert!(engine.sync_status().last_update.is_some());

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_ends_session() {
        let (_backend, engine) = engine(Identity::new("admin-1", Role::Admin, "team-1"), quiet());
        engine.start().await.unwrap();
        engine.shutdown().await;

        assert!(engine.session().effective_scope().is_none());
        assert!(!engine.sync_status().polling);
    }
}
