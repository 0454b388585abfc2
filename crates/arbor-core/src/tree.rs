//! Branch tree state container
//!
//! Wires the store, its persistence, the lifecycle bridge, the reparent
//! engine and the reconciler together. The host hands in its tab source and
//! then feeds tab events; the renderer reads the tree and issues reparents.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use arbor_branches::{BranchNode, BranchStore, Persistence, SqliteBranchBackend};
use arbor_lifecycle::{LifecycleBridge, StartupReport, TabEvent, TabSource};
use arbor_restructure::{
    DropGeometry, Pointer, ReconcileHandle, ReconcileReport, ReconcileScheduler, Reconciler,
    ReparentEngine, VisibleRow,
};
use arbor_storage::Database;

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

/// Settings key holding the time of the last reconcile sweep
pub const LAST_RECONCILE_KEY: &str = "reconcile.last_run_at";

pub struct BranchTree {
    config: Config,
    db: Option<Database>,
    store: BranchStore,
    bridge: Arc<LifecycleBridge>,
    reparent: ReparentEngine,
    reconciler: Reconciler,
    triggers: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    scheduler: Mutex<Option<ReconcileHandle>>,
}

impl BranchTree {
    /// Build the tree, falling back to memory-only when the database cannot
    /// be opened.
    pub fn new(config: Config, tabs: Arc<dyn TabSource>) -> Self {
        let db = if config.persistence_enabled {
            match Database::open(&config.database_path) {
                Ok(db) => Some(db),
                Err(e) => {
                    tracing::warn!(
                        path = %config.database_path.display(),
                        error = %e,
                        "Branch database unavailable, keeping branches in memory"
                    );
                    None
                }
            }
        } else {
            None
        };
        Self::assemble(config, db, tabs)
    }

    /// Like [`Self::new`] but fails instead of degrading.
    pub fn open(config: Config, tabs: Arc<dyn TabSource>) -> Result<Self> {
        config.validate()?;
        let db = if config.persistence_enabled {
            Some(Database::open(&config.database_path)?)
        } else {
            None
        };
        Ok(Self::assemble(config, db, tabs))
    }

    fn assemble(config: Config, db: Option<Database>, tabs: Arc<dyn TabSource>) -> Self {
        let persistence = db
            .clone()
            .and_then(|db| Persistence::spawn(Arc::new(SqliteBranchBackend::new(db))));
        if db.is_some() && persistence.is_none() {
            tracing::warn!("No async runtime for the branch writer, keeping branches in memory");
        }

        let store = BranchStore::new(persistence);
        let (trigger, triggers) = mpsc::unbounded_channel();
        let bridge =
            LifecycleBridge::new(store.clone(), tabs.clone()).with_reconcile_trigger(trigger);

        tracing::info!(persistent = store.is_persistent(), "Branch tree created");

        Self {
            config,
            db,
            reparent: ReparentEngine::new(store.clone()),
            reconciler: Reconciler::new(store.clone(), tabs),
            store,
            bridge: Arc::new(bridge),
            triggers: Mutex::new(Some(triggers)),
            scheduler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    pub fn store(&self) -> &BranchStore {
        &self.store
    }

    pub fn bridge(&self) -> &LifecycleBridge {
        &self.bridge
    }

    /// Merge the stored snapshot, link live tabs and start background
    /// reconciliation. Branches already in memory win over stored ones, and
    /// only the first call reads the snapshot or spawns the scheduler.
    pub async fn start(&self) -> StartupReport {
        let report = self.bridge.start().await;

        let triggers = self.triggers.lock().take();
        if let Some(triggers) = triggers {
            let db = self.db.clone();
            let settings = self.config.reconcile_settings();
            let handle = ReconcileScheduler::new(self.reconciler.clone(), settings)
                .on_run(move |_| record_reconcile(db.as_ref()))
                .spawn(triggers);
            *self.scheduler.lock() = Some(handle);
        }

        report
    }

    /// Drain host tab events on a background task.
    pub fn spawn_event_loop(&self, events: mpsc::Receiver<TabEvent>) -> JoinHandle<()> {
        let bridge = Arc::clone(&self.bridge);
        tokio::spawn(async move { bridge.run(events).await })
    }

    pub fn handle(&self, event: TabEvent) {
        self.bridge.handle(event);
    }

    pub fn get_tree(&self) -> Vec<BranchNode> {
        self.store.get_tree()
    }

    pub fn reparent(&self, branch_id: &str, new_parent_id: Option<&str>, index: usize) -> bool {
        self.reparent.reparent(branch_id, new_parent_id, index)
    }

    pub fn drop_at(
        &self,
        dragged: &str,
        rows: &[VisibleRow],
        pointer: Pointer,
        geometry: DropGeometry,
    ) -> bool {
        self.reparent.drop_at(dragged, rows, pointer, geometry)
    }

    /// Run a sweep right away, outside the schedule.
    pub fn reconcile_now(&self) -> ReconcileReport {
        let report = self.reconciler.run_once();
        record_reconcile(self.db.as_ref());
        report
    }

    pub fn last_reconciled_at(&self) -> Result<Option<DateTime<Utc>>> {
        let db = self.db.as_ref().ok_or(CoreError::PersistenceUnavailable)?;
        let Some(value) = db.get_setting(LAST_RECONCILE_KEY)? else {
            return Ok(None);
        };
        DateTime::parse_from_rfc3339(&value)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| CoreError::Config(format!("invalid {LAST_RECONCILE_KEY}: {e}")))
    }

    /// Stop background work and wait for pending writes.
    pub async fn shutdown(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(handle) = scheduler {
            handle.stop().await;
        }
        self.store.flush().await;
        tracing::info!("Branch tree shut down");
    }
}

fn record_reconcile(db: Option<&Database>) {
    let Some(db) = db else {
        return;
    };
    if let Err(e) = db.set_setting(LAST_RECONCILE_KEY, &Utc::now().to_rfc3339()) {
        tracing::warn!(error = %e, "Failed to record reconcile time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_branches::ROOT_BRANCH_ID;
    use arbor_lifecycle::{AddOptions, MemoryTabSource, TabData};
    use std::path::PathBuf;

    fn temp_config() -> (PathBuf, Config) {
        let dir = std::env::temp_dir().join(format!("arbor-tree-{}", uuid::Uuid::new_v4()));
        let config = Config {
            startup_reconcile_delay_ms: 3_600_000,
            ..Config::new(dir.clone())
        };
        (dir, config)
    }

    fn added(tab_id: &str, data: TabData) -> TabEvent {
        TabEvent::Added {
            tab_id: tab_id.to_string(),
            data,
            options: AddOptions::default(),
            container_id: "window-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_tree() {
        let tabs = Arc::new(MemoryTabSource::new());
        tabs.open("t0", TabData::new("https://start.example", "Start"));

        let tree = BranchTree::new(Config::in_memory(), tabs.clone());
        assert!(!tree.is_persistent());

        let report = tree.start().await;
        assert_eq!(report.migrated, 1);
        assert_eq!(tabs.branch_of("t0").as_deref(), Some(ROOT_BRANCH_ID));

        tabs.open("t1", TabData::new("https://a.example", "").opened_from(ROOT_BRANCH_ID));
        tree.handle(added(
            "t1",
            TabData::new("https://a.example", "").opened_from(ROOT_BRANCH_ID),
        ));
        let a = tree.store().get_by_tab_id("t1").unwrap();

        let nodes = tree.get_tree();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].children.len(), 1);
        assert!(!tree.reparent(ROOT_BRANCH_ID, Some(a.id.as_str()), 0));

        assert!(matches!(
            tree.last_reconciled_at(),
            Err(CoreError::PersistenceUnavailable)
        ));
        tree.shutdown().await;
    }

    #[tokio::test]
    async fn test_branches_survive_restart() {
        let (dir, config) = temp_config();

        let tabs = Arc::new(MemoryTabSource::new());
        tabs.open("t0", TabData::new("https://start.example", "Start"));
        let tree = BranchTree::open(config.clone(), tabs.clone()).unwrap();
        assert!(tree.is_persistent());
        tree.start().await;

        tabs.open("t1", TabData::new("https://a.example", ""));
        tree.handle(added(
            "t1",
            TabData::new("https://a.example", "").opened_from(ROOT_BRANCH_ID),
        ));
        let a = tree.store().get_by_tab_id("t1").unwrap();
        tree.shutdown().await;
        drop(tree);

        let reopened = BranchTree::open(config, tabs.clone()).unwrap();
        let report = reopened.start().await;
        assert_eq!(report.restored, 2);
        assert_eq!(report.migrated, 0);
        assert_eq!(
            reopened.store().get(&a.id).unwrap().parent_id.as_deref(),
            Some(ROOT_BRANCH_ID)
        );
        reopened.shutdown().await;

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_events_before_start_survive() {
        let (dir, config) = temp_config();
        let tabs = Arc::new(MemoryTabSource::new());
        tabs.open("t0", TabData::new("https://start.example", "Start"));

        let tree = BranchTree::open(config, tabs.clone()).unwrap();
        tree.handle(added("t0", TabData::new("https://start.example", "Start")));
        tabs.open("t1", TabData::new("https://a.example", ""));
        tree.handle(added(
            "t1",
            TabData::new("https://a.example", "").opened_from(ROOT_BRANCH_ID),
        ));
        let a = tree.store().get_by_tab_id("t1").unwrap();

        tree.start().await;
        assert!(tree.store().contains(&a.id));
        assert_eq!(tree.store().count(), 2);

        // Restarting the engine does not reload over memory
        let b = tree.store().create(None, Some(a.id.as_str()), String::new(), String::new());
        assert_eq!(tree.start().await.restored, 0);
        assert!(tree.store().contains(&b.unwrap()));

        tree.shutdown().await;
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_now_records_time() {
        let (dir, config) = temp_config();
        let tabs = Arc::new(MemoryTabSource::new());
        tabs.open("t0", TabData::default());

        let tree = BranchTree::open(config, tabs.clone()).unwrap();
        tree.start().await;
        assert_eq!(tree.last_reconciled_at().unwrap(), None);

        tabs.open("t1", TabData::default());
        tree.handle(added("t1", TabData::default()));
        tabs.close("t1");

        let report = tree.reconcile_now();
        assert_eq!(report.stale_destroyed, 1);
        assert!(tree.last_reconciled_at().unwrap().is_some());

        tree.shutdown().await;
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_unwritable_database_degrades() {
        let blocker = std::env::temp_dir().join(format!("arbor-file-{}", uuid::Uuid::new_v4()));
        std::fs::write(&blocker, b"not a directory").unwrap();
        let config = Config::new(blocker.clone());

        let tree = BranchTree::new(config.clone(), Arc::new(MemoryTabSource::new()));
        assert!(!tree.is_persistent());
        assert!(BranchTree::open(config, Arc::new(MemoryTabSource::new())).is_err());

        std::fs::remove_file(&blocker).unwrap();
    }
}
