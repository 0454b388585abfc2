//! Reparent Engine
//!
//! Validates drag-driven moves before touching the store. A rejected move
//! leaves the tree exactly as it was.

use arbor_branches::{BranchError, BranchStore, ROOT_BRANCH_ID};

use crate::drop_target::{resolve_drop, DropGeometry, Pointer, VisibleRow};
use crate::error::ReparentError;

pub struct ReparentEngine {
    store: BranchStore,
}

impl ReparentEngine {
    pub fn new(store: BranchStore) -> Self {
        Self { store }
    }

    /// Move `branch_id` under `new_parent_id` (ROOT when `None`) at sibling
    /// position `index`.
    pub fn try_reparent(
        &self,
        branch_id: &str,
        new_parent_id: Option<&str>,
        index: usize,
    ) -> Result<(), ReparentError> {
        let parent = new_parent_id.unwrap_or(ROOT_BRANCH_ID);

        if branch_id == ROOT_BRANCH_ID {
            return Err(ReparentError::MovingRoot);
        }
        if parent == branch_id {
            return Err(ReparentError::SelfParent(branch_id.to_string()));
        }
        if !self.store.contains(branch_id) {
            return Err(ReparentError::UnknownBranch(branch_id.to_string()));
        }
        if !self.store.contains(parent) {
            return Err(ReparentError::UnknownParent(parent.to_string()));
        }
        if self
            .store
            .get_ancestors(parent)
            .iter()
            .any(|ancestor| ancestor.id == branch_id)
        {
            return Err(ReparentError::Cycle {
                branch: branch_id.to_string(),
                parent: parent.to_string(),
            });
        }

        self.store
            .set_parent(branch_id, parent, Some(index))
            .map_err(|e| store_refusal(e, branch_id, parent))
    }

    /// [`Self::try_reparent`] for callers that just drop a failed drag.
    pub fn reparent(&self, branch_id: &str, new_parent_id: Option<&str>, index: usize) -> bool {
        match self.try_reparent(branch_id, new_parent_id, index) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(branch_id = %branch_id, error = %e, "Rejected reparent");
                false
            }
        }
    }

    /// Resolve a pointer drop over the rendered rows and apply it.
    pub fn drop_at(
        &self,
        dragged: &str,
        rows: &[VisibleRow],
        pointer: Pointer,
        geometry: DropGeometry,
    ) -> bool {
        match resolve_drop(&self.store, rows, pointer, geometry) {
            Some(placement) => {
                self.reparent(dragged, Some(placement.parent_id.as_str()), placement.index)
            }
            None => {
                tracing::debug!(branch_id = %dragged, "No drop target under pointer");
                false
            }
        }
    }
}

/// Translate a store error that slipped past the checks above.
fn store_refusal(error: BranchError, branch_id: &str, parent: &str) -> ReparentError {
    match error {
        BranchError::RootImmutable => ReparentError::MovingRoot,
        BranchError::SelfParent(id) => ReparentError::SelfParent(id),
        BranchError::Cycle { branch, parent } => ReparentError::Cycle { branch, parent },
        BranchError::NotFound(id) if id == branch_id => ReparentError::UnknownBranch(id),
        BranchError::NotFound(id) => ReparentError::UnknownParent(id),
        other => {
            tracing::warn!(branch_id = %branch_id, error = %other, "Store refused reparent");
            ReparentError::UnknownParent(parent.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (BranchStore, ReparentEngine, String, String) {
        let store = BranchStore::in_memory();
        store.ensure_root(Some("t0".to_string()));
        let a = store
            .create(Some("t1".to_string()), Some(ROOT_BRANCH_ID), "a".to_string(), String::new())
            .unwrap();
        let a1 = store
            .create(Some("t2".to_string()), Some(a.as_str()), "a1".to_string(), String::new())
            .unwrap();
        let engine = ReparentEngine::new(store.clone());
        (store, engine, a, a1)
    }

    #[test]
    fn test_root_cannot_move() {
        let (store, engine, a, _) = setup();
        assert_eq!(
            engine.try_reparent(ROOT_BRANCH_ID, Some(a.as_str()), 0),
            Err(ReparentError::MovingRoot)
        );
        assert!(!engine.reparent(ROOT_BRANCH_ID, Some(a.as_str()), 0));
        assert!(store.root().unwrap().parent_id.is_none());
    }

    #[test]
    fn test_self_and_cycle_rejected() {
        let (store, engine, a, a1) = setup();
        assert_eq!(
            engine.try_reparent(&a, Some(a.as_str()), 0),
            Err(ReparentError::SelfParent(a.clone()))
        );
        assert_eq!(
            engine.try_reparent(&a, Some(a1.as_str()), 0),
            Err(ReparentError::Cycle {
                branch: a.clone(),
                parent: a1.clone()
            })
        );
        assert_eq!(store.get(&a).unwrap().parent_id.as_deref(), Some(ROOT_BRANCH_ID));
        assert_eq!(store.get(&a1).unwrap().parent_id.as_deref(), Some(a.as_str()));
    }

    #[test]
    fn test_unknown_ids_rejected() {
        let (_, engine, a, _) = setup();
        assert_eq!(
            engine.try_reparent("ghost", Some(a.as_str()), 0),
            Err(ReparentError::UnknownBranch("ghost".to_string()))
        );
        assert_eq!(
            engine.try_reparent(&a, Some("ghost"), 0),
            Err(ReparentError::UnknownParent("ghost".to_string()))
        );
    }

    #[test]
    fn test_store_refusal_keeps_ids() {
        assert_eq!(
            store_refusal(BranchError::NotFound("p".to_string()), "b", "p"),
            ReparentError::UnknownParent("p".to_string())
        );
        assert_eq!(
            store_refusal(BranchError::NotFound("b".to_string()), "b", "p"),
            ReparentError::UnknownBranch("b".to_string())
        );
        assert_eq!(
            store_refusal(BranchError::Worker("gone".to_string()), "b", "p"),
            ReparentError::UnknownParent("p".to_string())
        );
    }

    #[test]
    fn test_move_to_root_with_index() {
        let (store, engine, a, a1) = setup();
        assert!(engine.reparent(&a1, None, 0));
        assert_eq!(store.get_child_ids(ROOT_BRANCH_ID), vec![a1.clone(), a.clone()]);
        assert!(store.get_child_ids(&a).is_empty());

        // Back under `a`
        assert!(engine.reparent(&a1, Some(a.as_str()), 0));
        assert_eq!(store.get_child_ids(ROOT_BRANCH_ID), vec![a]);
    }

    const ROW: f32 = 20.0;
    const GEOMETRY: DropGeometry = DropGeometry {
        indent: 16.0,
        origin_x: 0.0,
    };

    fn rows(ids: &[&str]) -> Vec<VisibleRow> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| VisibleRow {
                branch_id: id.to_string(),
                top: i as f32 * ROW,
                height: ROW,
                expanded: true,
            })
            .collect()
    }

    fn pointer(row: usize, lower_half: bool, depth: f32) -> Pointer {
        Pointer {
            x: depth * GEOMETRY.indent + 1.0,
            y: row as f32 * ROW + if lower_half { ROW * 0.75 } else { ROW * 0.25 },
        }
    }

    #[test]
    fn test_drop_reorders_within_parent() {
        let store = BranchStore::in_memory();
        store.ensure_root(None);
        let [a, b, c] = ["a", "b", "c"].map(|url| {
            store
                .create(None, Some(ROOT_BRANCH_ID), url.to_string(), String::new())
                .unwrap()
        });
        let engine = ReparentEngine::new(store.clone());

        // `a` dropped below `c`
        let visible = rows(&[ROOT_BRANCH_ID, &a, &b, &c]);
        assert!(engine.drop_at(&a, &visible, pointer(3, true, 1.0), GEOMETRY));
        assert_eq!(
            store.get_child_ids(ROOT_BRANCH_ID),
            vec![b.clone(), c.clone(), a.clone()]
        );

        // `c` dropped above `b`
        let visible = rows(&[ROOT_BRANCH_ID, &b, &c, &a]);
        assert!(engine.drop_at(&c, &visible, pointer(1, false, 1.0), GEOMETRY));
        assert_eq!(
            store.get_child_ids(ROOT_BRANCH_ID),
            vec![c.clone(), b.clone(), a.clone()]
        );

        // `c` dropped below `b`, one slot further down
        let visible = rows(&[ROOT_BRANCH_ID, &c, &b, &a]);
        assert!(engine.drop_at(&c, &visible, pointer(2, true, 1.0), GEOMETRY));
        assert_eq!(store.get_child_ids(ROOT_BRANCH_ID), vec![b, c, a]);

        let order: Vec<u32> = store
            .get_children(ROOT_BRANCH_ID)
            .iter()
            .map(|branch| branch.sibling_index)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_drop_into_own_subtree_is_refused() {
        let (store, engine, a, a1) = setup();
        let before = store.get_all();

        // Nest `a` under its own child
        let visible = rows(&[ROOT_BRANCH_ID, &a, &a1]);
        assert!(!engine.drop_at(&a, &visible, pointer(2, true, 3.0), GEOMETRY));
        // Above its own child resolves to `a` as the parent
        assert!(!engine.drop_at(&a, &visible, pointer(2, false, 2.0), GEOMETRY));

        assert_eq!(store.get_all(), before);
        assert_eq!(store.get_child_ids(&a), vec![a1]);
    }
}
