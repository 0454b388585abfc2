//! Tree reconciliation
//!
//! A sweep repairs whatever drift built up between the branch tree and the
//! host's live tabs:
//! 1. break corrupted parent chains by detaching one member of each cycle
//! 2. destroy branches whose tab is gone (one branch at a time, no cascade)
//! 3. hang every parentless branch other than ROOT back under ROOT
//!
//! Every pass only acts on drift, so a second sweep over an unchanged tree
//! does nothing.

use std::sync::Arc;

use serde::Serialize;

use arbor_branches::{BranchStore, ROOT_BRANCH_ID};
use arbor_lifecycle::TabSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub stale_destroyed: usize,
    pub orphans_reattached: usize,
    pub cycles_broken: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: BranchStore,
    tabs: Arc<dyn TabSource>,
}

impl Reconciler {
    pub fn new(store: BranchStore, tabs: Arc<dyn TabSource>) -> Self {
        Self { store, tabs }
    }

    pub fn run_once(&self) -> ReconcileReport {
        let report = ReconcileReport {
            cycles_broken: self.break_cycles(),
            stale_destroyed: self.destroy_stale(),
            orphans_reattached: self.reattach_orphans(),
        };

        if report.is_clean() {
            tracing::debug!("Reconcile found nothing to repair");
        } else {
            tracing::info!(
                stale_destroyed = report.stale_destroyed,
                orphans_reattached = report.orphans_reattached,
                cycles_broken = report.cycles_broken,
                "Reconciled branch tree"
            );
        }
        report
    }

    fn break_cycles(&self) -> usize {
        let mut broken = 0;
        for id in self.store.find_cycles() {
            tracing::warn!(branch_id = %id, "Detaching branch from corrupt parent chain");
            if self.store.detach(&id) {
                broken += 1;
            }
        }
        broken
    }

    /// A branch without a tab id is never stale: it was never bound to a tab.
    fn destroy_stale(&self) -> usize {
        let stale: Vec<String> = self
            .store
            .get_all()
            .into_iter()
            .filter(|branch| !branch.is_root())
            .filter(|branch| {
                branch
                    .tab_id
                    .as_deref()
                    .is_some_and(|tab_id| !self.tabs.tab_exists(tab_id))
            })
            .map(|branch| branch.id)
            .collect();

        stale.iter().filter(|id| self.store.destroy(id)).count()
    }

    fn reattach_orphans(&self) -> usize {
        if !self.store.contains(ROOT_BRANCH_ID) {
            return 0;
        }

        let mut reattached = 0;
        for orphan in self.store.get_roots() {
            if orphan.is_root() {
                continue;
            }
            match self.store.set_parent(&orphan.id, ROOT_BRANCH_ID, None) {
                Ok(()) => reattached += 1,
                Err(e) => {
                    tracing::warn!(branch_id = %orphan.id, error = %e, "Could not reattach orphan")
                }
            }
        }
        reattached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_branches::Branch;
    use arbor_lifecycle::{MemoryTabSource, TabData};

    fn setup() -> (BranchStore, Arc<MemoryTabSource>, Reconciler) {
        let store = BranchStore::in_memory();
        let tabs = Arc::new(MemoryTabSource::new());
        let reconciler = Reconciler::new(store.clone(), tabs.clone());
        (store, tabs, reconciler)
    }

    fn branch_for(store: &BranchStore, tabs: &MemoryTabSource, tab: &str, parent: &str) -> String {
        tabs.open(tab, TabData::new("https://example.com", ""));
        store
            .create(
                Some(tab.to_string()),
                Some(parent),
                "https://example.com".to_string(),
                String::new(),
            )
            .unwrap()
    }

    #[test]
    fn test_stale_branch_destroyed_children_rehomed() {
        let (store, tabs, reconciler) = setup();
        tabs.open("t0", TabData::default());
        store.ensure_root(Some("t0".to_string()));
        let a = branch_for(&store, &tabs, "t1", ROOT_BRANCH_ID);
        let a1 = branch_for(&store, &tabs, "t2", &a);

        tabs.close("t1");
        let report = reconciler.run_once();

        assert_eq!(report.stale_destroyed, 1);
        assert!(!store.contains(&a));
        assert_eq!(store.get(&a1).unwrap().parent_id.as_deref(), Some(ROOT_BRANCH_ID));
    }

    #[test]
    fn test_root_survives_closed_tab() {
        let (store, _tabs, reconciler) = setup();
        store.ensure_root(Some("gone".to_string()));

        assert!(reconciler.run_once().is_clean());
        assert!(store.root().is_some());
    }

    #[test]
    fn test_orphans_reattached_to_root() {
        let (store, tabs, reconciler) = setup();
        store.ensure_root(None);
        let orphan = branch_for(&store, &tabs, "t1", ROOT_BRANCH_ID);
        assert!(store.detach(&orphan));
        assert_eq!(store.get_roots().len(), 2);

        let report = reconciler.run_once();
        assert_eq!(report.orphans_reattached, 1);
        assert_eq!(store.get_roots().len(), 1);
        assert_eq!(store.get_child_ids(ROOT_BRANCH_ID), vec![orphan]);
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let (store, tabs, reconciler) = setup();
        store.ensure_root(None);
        let a = branch_for(&store, &tabs, "t1", ROOT_BRANCH_ID);
        let b = branch_for(&store, &tabs, "t2", ROOT_BRANCH_ID);
        branch_for(&store, &tabs, "t3", &a);
        store.detach(&b);
        tabs.close("t1");

        let first = reconciler.run_once();
        assert_eq!(first.stale_destroyed, 1);
        assert_eq!(first.orphans_reattached, 1);

        let before = store.get_all();
        let second = reconciler.run_once();
        assert_eq!(second.stale_destroyed, 0);
        assert_eq!(second.orphans_reattached, 0);
        assert!(second.is_clean());
        assert_eq!(store.get_all(), before);
    }

    #[test]
    fn test_corrupt_cycle_is_repaired() {
        let (store, _tabs, reconciler) = setup();
        let root = Branch::root(None);
        let mut x = Branch::new(None, None, "x".to_string(), String::new());
        let mut y = Branch::new(None, None, "y".to_string(), String::new());
        x.parent_id = Some(y.id.clone());
        y.parent_id = Some(x.id.clone());
        let (x_id, y_id) = (x.id.clone(), y.id.clone());
        store.restore(vec![root, x, y]);

        let report = reconciler.run_once();
        assert_eq!(report.cycles_broken, 1);
        assert_eq!(report.orphans_reattached, 1);
        assert!(store.find_cycles().is_empty());

        // Both survive, one now hangs under ROOT and the other under it
        let x_chain = store.get_ancestors(&x_id);
        let y_chain = store.get_ancestors(&y_id);
        assert_eq!(x_chain.last().unwrap().id, ROOT_BRANCH_ID);
        assert_eq!(y_chain.last().unwrap().id, ROOT_BRANCH_ID);
        assert!(reconciler.run_once().is_clean());
    }
}
