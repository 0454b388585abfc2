//! Parent → ordered children index
//!
//! Sibling order is explicit: each list here is the source of truth while the
//! process runs, and `Branch::sibling_index` mirrors it for the next start.

use std::collections::{HashMap, HashSet};

use crate::branch::Branch;

#[derive(Debug, Default)]
pub(crate) struct TreeIndex {
    children: HashMap<String, Vec<String>>,
}

impl TreeIndex {
    /// Build from loaded branches, ordering siblings by
    /// `(sibling_index, created_at, id)`.
    pub(crate) fn rebuild(branches: &HashMap<String, Branch>) -> Self {
        let mut grouped: HashMap<String, Vec<&Branch>> = HashMap::new();
        for branch in branches.values() {
            if let Some(parent) = &branch.parent_id {
                grouped.entry(parent.clone()).or_default().push(branch);
            }
        }

        let children = grouped
            .into_iter()
            .map(|(parent, mut kids)| {
                kids.sort_by(|a, b| {
                    a.sibling_index
                        .cmp(&b.sibling_index)
                        .then(a.created_at.cmp(&b.created_at))
                        .then(a.id.cmp(&b.id))
                });
                (parent, kids.into_iter().map(|b| b.id.clone()).collect())
            })
            .collect();

        Self { children }
    }

    pub(crate) fn children_of(&self, parent: &str) -> &[String] {
        self.children
            .get(parent)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn position(&self, parent: &str, child: &str) -> Option<usize> {
        self.children_of(parent).iter().position(|id| id == child)
    }

    /// Insert `child` under `parent` at `at` (clamped), or last.
    pub(crate) fn insert(&mut self, parent: &str, child: &str, at: Option<usize>) -> usize {
        let list = self.children.entry(parent.to_string()).or_default();
        let at = at.unwrap_or(list.len()).min(list.len());
        list.insert(at, child.to_string());
        at
    }

    pub(crate) fn remove(&mut self, parent: &str, child: &str) -> Option<usize> {
        let list = self.children.get_mut(parent)?;
        let at = list.iter().position(|id| id == child)?;
        list.remove(at);
        if list.is_empty() {
            self.children.remove(parent);
        }
        Some(at)
    }

    /// Drop the list for `parent` and hand back its children in order.
    pub(crate) fn take(&mut self, parent: &str) -> Vec<String> {
        self.children.remove(parent).unwrap_or_default()
    }

    /// Depth-first, pre-order walk of everything below `id`.
    pub(crate) fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.to_string());

        let mut stack: Vec<&String> = self.children_of(id).iter().rev().collect();
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                tracing::warn!(branch_id = %next, "Cycle in child index, skipping");
                continue;
            }
            out.push(next.clone());
            stack.extend(self.children_of(next).iter().rev());
        }

        out
    }
}
