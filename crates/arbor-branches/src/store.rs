//! Branch Store
//!
//! The authoritative in-memory map of branches. Every mutation updates memory
//! first and then queues a best-effort durable write; nothing here ever fails
//! because the disk did.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::branch::{Branch, BranchNode, BranchPatch, ROOT_BRANCH_ID};
use crate::error::BranchError;
use crate::history::{HistoryEntry, HistoryOptions, HistoryView, RecordOutcome};
use crate::index::TreeIndex;
use crate::persistence::Persistence;
use crate::Result;

#[derive(Default)]
struct Inner {
    branches: HashMap<String, Branch>,
    index: TreeIndex,
    by_tab: HashMap<String, String>,
}

/// Ids touched by one mutation, flushed to persistence once the map is updated.
#[derive(Default)]
struct Writes {
    puts: Vec<String>,
    deletes: Vec<String>,
}

impl Writes {
    fn put(&mut self, id: &str) {
        if !self.puts.iter().any(|p| p == id) {
            self.puts.push(id.to_string());
        }
    }

    fn delete(&mut self, id: &str) {
        self.puts.retain(|p| p != id);
        self.deletes.push(id.to_string());
    }
}

impl Inner {
    fn root_exists(&self) -> bool {
        self.branches.contains_key(ROOT_BRANCH_ID)
    }

    /// Walk up from `id`, nearest parent first. Stops at the first repeat.
    fn ancestor_ids(&self, id: &str) -> (Vec<String>, bool) {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.to_string());

        let mut current = self.branches.get(id).and_then(|b| b.parent_id.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                return (out, true);
            }
            current = self
                .branches
                .get(&parent)
                .and_then(|b| b.parent_id.clone());
            if self.branches.contains_key(&parent) {
                out.push(parent);
            }
        }

        (out, false)
    }

    fn is_descendant(&self, candidate: &str, of: &str) -> bool {
        self.ancestor_ids(candidate).0.iter().any(|id| id == of)
    }

    /// Sync `sibling_index` with the index list for `parent`.
    fn renumber(&mut self, parent: &str, writes: &mut Writes) {
        let ids: Vec<String> = self.index.children_of(parent).to_vec();
        for (position, id) in ids.iter().enumerate() {
            if let Some(branch) = self.branches.get_mut(id) {
                if branch.sibling_index != position as u32 {
                    branch.sibling_index = position as u32;
                    writes.put(id);
                }
            }
        }
    }

    fn attach(&mut self, id: &str, parent: &str, at: Option<usize>, writes: &mut Writes) {
        self.index.insert(parent, id, at);
        if let Some(branch) = self.branches.get_mut(id) {
            branch.parent_id = Some(parent.to_string());
        }
        writes.put(id);
        self.renumber(parent, writes);
    }

    fn detach(&mut self, id: &str, writes: &mut Writes) {
        let parent = self.branches.get(id).and_then(|b| b.parent_id.clone());
        if let Some(parent) = parent {
            self.index.remove(&parent, id);
            self.renumber(&parent, writes);
        }
        if let Some(branch) = self.branches.get_mut(id) {
            branch.parent_id = None;
        }
        writes.put(id);
    }

    fn set_parent(
        &mut self,
        id: &str,
        parent: &str,
        at: Option<usize>,
        writes: &mut Writes,
    ) -> Result<()> {
        if id == ROOT_BRANCH_ID {
            return Err(BranchError::RootImmutable);
        }
        if !self.branches.contains_key(id) {
            return Err(BranchError::NotFound(id.to_string()));
        }
        if !self.branches.contains_key(parent) {
            return Err(BranchError::NotFound(parent.to_string()));
        }
        if id == parent {
            return Err(BranchError::SelfParent(id.to_string()));
        }
        if self.is_descendant(parent, id) {
            return Err(BranchError::Cycle {
                branch: id.to_string(),
                parent: parent.to_string(),
            });
        }

        // Indices are given against the list as it looks before the move
        let mut at = at;
        let current_parent = self.branches.get(id).and_then(|b| b.parent_id.clone());
        if current_parent.as_deref() == Some(parent) {
            if let (Some(old), Some(target)) = (self.index.position(parent, id), at) {
                if old < target {
                    at = Some(target - 1);
                }
            }
        }

        self.detach(id, writes);
        self.attach(id, parent, at, writes);
        Ok(())
    }

    /// Remove one branch. Its children move to ROOT, or become orphans if
    /// there is no ROOT yet.
    fn remove(&mut self, id: &str, writes: &mut Writes) -> Option<Branch> {
        if id == ROOT_BRANCH_ID || !self.branches.contains_key(id) {
            return None;
        }

        self.detach(id, writes);

        let children = self.index.take(id);
        let adopt = self.root_exists();
        for child in &children {
            if let Some(branch) = self.branches.get_mut(child) {
                branch.parent_id = None;
            }
            if adopt {
                self.attach(child, ROOT_BRANCH_ID, None, writes);
            } else {
                writes.put(child);
            }
        }

        let branch = self.branches.remove(id)?;
        if let Some(tab_id) = &branch.tab_id {
            if self.by_tab.get(tab_id).map(String::as_str) == Some(id) {
                self.by_tab.remove(tab_id);
            }
        }
        writes.delete(id);
        Some(branch)
    }

    fn map_tab(&mut self, branch_id: &str, old: Option<&str>, new: Option<&str>) {
        if let Some(old) = old {
            if self.by_tab.get(old).map(String::as_str) == Some(branch_id) {
                self.by_tab.remove(old);
            }
        }
        if let Some(new) = new {
            if let Some(previous) = self.by_tab.insert(new.to_string(), branch_id.to_string()) {
                if previous != branch_id {
                    tracing::debug!(
                        tab_id = %new,
                        previous = %previous,
                        branch_id = %branch_id,
                        "Tab remapped to a different branch"
                    );
                }
            }
        }
    }

    fn roots(&self) -> Vec<&Branch> {
        let mut roots: Vec<&Branch> = self
            .branches
            .values()
            .filter(|b| b.parent_id.is_none())
            .collect();
        roots.sort_by(|a, b| {
            b.is_root()
                .cmp(&a.is_root())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        roots
    }

    fn node(&self, id: &str, seen: &mut HashSet<String>) -> Option<BranchNode> {
        if !seen.insert(id.to_string()) {
            return None;
        }
        let branch = self.branches.get(id)?.clone();
        let children = self
            .index
            .children_of(id)
            .iter()
            .filter_map(|child| self.node(child, seen))
            .collect();
        Some(BranchNode { branch, children })
    }
}

pub struct BranchStore {
    inner: Arc<RwLock<Inner>>,
    /// `None` runs the store purely in memory
    persistence: Option<Persistence>,
    /// Set once the durable snapshot has been read
    loaded: Arc<AtomicBool>,
}

impl BranchStore {
    pub fn new(persistence: Option<Persistence>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            persistence,
            loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    fn commit(&self, inner: &Inner, writes: Writes) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        for id in &writes.puts {
            if let Some(branch) = inner.branches.get(id) {
                persistence.put(branch);
            }
        }
        for id in &writes.deletes {
            persistence.delete(id);
        }
    }

    /// Merge the durable snapshot into memory, once per store. Returns how
    /// many branches came from disk; a failed read leaves memory as it was.
    pub async fn load_persisted(&self) -> usize {
        let Some(persistence) = &self.persistence else {
            return 0;
        };
        if self.loaded.swap(true, Ordering::SeqCst) {
            tracing::debug!("Durable snapshot already loaded");
            return 0;
        }

        match persistence.load_all().await {
            Ok(records) => self.restore(records),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted branches");
                0
            }
        }
    }

    /// Add `records` to memory, repairing anything that breaks the tree
    /// invariants.
    ///
    /// Memory wins every conflict: a record whose id is already present is
    /// ignored, and a record for a tab that already has a branch is dropped
    /// from disk. Returns how many records were taken.
    pub fn restore(&self, records: Vec<Branch>) -> usize {
        let mut inner = self.inner.write();
        let mut writes = Writes::default();

        let mut restored: Vec<String> = Vec::new();
        for record in records {
            if inner.branches.contains_key(&record.id) {
                continue;
            }
            if let Some(tab_id) = record.tab_id.as_deref() {
                if inner.by_tab.contains_key(tab_id) {
                    tracing::debug!(
                        branch_id = %record.id,
                        tab_id = %tab_id,
                        "Dropping stored branch for a tab linked in memory"
                    );
                    writes.delete(&record.id);
                    continue;
                }
            }
            restored.push(record.id.clone());
            inner.branches.insert(record.id.clone(), record);
        }

        for id in &restored {
            let dangling = {
                let branch = &inner.branches[id];
                match &branch.parent_id {
                    Some(_) if branch.is_root() => true,
                    Some(parent) => !inner.branches.contains_key(parent),
                    None => false,
                }
            };
            if dangling {
                tracing::warn!(branch_id = %id, "Dropping dangling parent on load");
                if let Some(branch) = inner.branches.get_mut(id) {
                    branch.parent_id = None;
                }
                writes.put(id);
            }
        }

        inner.index = TreeIndex::rebuild(&inner.branches);
        let parents: Vec<String> = inner
            .branches
            .values()
            .filter_map(|b| b.parent_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for parent in &parents {
            inner.renumber(parent, &mut writes);
        }

        // Most recently active stored branch wins a contested tab
        let mut claimed: Vec<(String, String, chrono::DateTime<Utc>)> = restored
            .iter()
            .filter_map(|id| inner.branches.get(id))
            .filter_map(|b| {
                b.tab_id
                    .clone()
                    .map(|tab| (tab, b.id.clone(), b.last_active_at))
            })
            .collect();
        claimed.sort_by(|a, b| a.2.cmp(&b.2));
        for (tab, id, _) in claimed {
            inner.by_tab.insert(tab, id);
        }

        let count = restored.len();
        self.commit(&inner, writes);

        tracing::info!(count, total = inner.branches.len(), "Restored branches");
        count
    }

    /// Wait for queued durable writes.
    pub async fn flush(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.flush().await;
        }
    }

    /// Create a branch.
    ///
    /// With no parent the branch goes under ROOT, or stays parentless until
    /// ROOT exists. An unknown parent refuses the create.
    pub fn create(
        &self,
        tab_id: Option<String>,
        parent_id: Option<&str>,
        url: String,
        title: String,
    ) -> Option<String> {
        let mut inner = self.inner.write();
        let mut writes = Writes::default();

        let parent = match parent_id {
            Some(parent) if !inner.branches.contains_key(parent) => {
                tracing::warn!(parent_id = %parent, "Refusing to create branch under unknown parent");
                return None;
            }
            Some(parent) => Some(parent.to_string()),
            None if inner.root_exists() => Some(ROOT_BRANCH_ID.to_string()),
            None => None,
        };

        let branch = Branch::new(tab_id, None, url, title);
        let id = branch.id.clone();
        let tab = branch.tab_id.clone();
        inner.branches.insert(id.clone(), branch);
        inner.map_tab(&id, None, tab.as_deref());

        match &parent {
            Some(parent) => inner.attach(&id, parent, None, &mut writes),
            None => writes.put(&id),
        }

        if let Some(branch) = inner.branches.get(&id) {
            tracing::info!(
                branch_id = %id,
                tab_id = ?branch.tab_id,
                parent_id = ?branch.parent_id,
                url = %branch.url,
                "Created branch"
            );
        }

        self.commit(&inner, writes);
        Some(id)
    }

    pub fn get(&self, id: &str) -> Option<Branch> {
        self.inner.read().branches.get(id).cloned()
    }

    pub fn get_by_tab_id(&self, tab_id: &str) -> Option<Branch> {
        let inner = self.inner.read();
        inner
            .by_tab
            .get(tab_id)
            .and_then(|id| inner.branches.get(id))
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().branches.contains_key(id)
    }

    pub fn root(&self) -> Option<Branch> {
        self.get(ROOT_BRANCH_ID)
    }

    /// Shallow-merge `patch` into the branch. The patch is applied whole or
    /// not at all.
    pub fn update(&self, id: &str, patch: BranchPatch) -> Option<Branch> {
        let mut inner = self.inner.write();
        let mut writes = Writes::default();

        let old_tab = inner.branches.get(id)?.tab_id.clone();

        if let Some(parent) = &patch.parent_id {
            let already = inner.branches.get(id)?.parent_id.as_deref() == Some(parent.as_str());
            if !already {
                if let Err(e) = inner.set_parent(id, parent, None, &mut writes) {
                    tracing::warn!(branch_id = %id, error = %e, "Refusing branch update");
                    return None;
                }
            }
        }

        if let Some(new_tab) = &patch.tab_id {
            inner.map_tab(id, old_tab.as_deref(), new_tab.as_deref());
        }

        let branch = inner.branches.get_mut(id)?;
        branch.apply(&patch);
        let updated = branch.clone();
        writes.put(id);

        self.commit(&inner, writes);
        Some(updated)
    }

    /// Move `id` under `parent` at sibling position `at` (last if `None`).
    pub fn set_parent(&self, id: &str, parent: &str, at: Option<usize>) -> Result<()> {
        let mut inner = self.inner.write();
        let mut writes = Writes::default();

        inner.set_parent(id, parent, at, &mut writes)?;

        tracing::info!(branch_id = %id, parent_id = %parent, position = ?at, "Reparented branch");
        self.commit(&inner, writes);
        Ok(())
    }

    /// Clear the parent link. Used to isolate nodes found on a corrupt chain.
    pub fn detach(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        if id == ROOT_BRANCH_ID || !inner.branches.contains_key(id) {
            return false;
        }
        let mut writes = Writes::default();
        inner.detach(id, &mut writes);
        self.commit(&inner, writes);
        true
    }

    /// Destroy a single branch. ROOT and unknown ids are refused.
    pub fn destroy(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let mut writes = Writes::default();

        let Some(branch) = inner.remove(id, &mut writes) else {
            return false;
        };

        tracing::info!(branch_id = %id, tab_id = ?branch.tab_id, "Destroyed branch");
        self.commit(&inner, writes);
        true
    }

    /// Destroy a branch and everything below it, deepest first.
    pub fn destroy_with_children(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        if id == ROOT_BRANCH_ID || !inner.branches.contains_key(id) {
            return false;
        }

        let mut writes = Writes::default();
        let descendants = inner.index.descendants(id);
        for child in descendants.iter().rev() {
            inner.remove(child, &mut writes);
        }
        inner.remove(id, &mut writes);

        tracing::info!(
            branch_id = %id,
            descendants = descendants.len(),
            "Destroyed branch with children"
        );
        self.commit(&inner, writes);
        true
    }

    /// Children of `id` in sibling order.
    pub fn get_children(&self, id: &str) -> Vec<Branch> {
        let inner = self.inner.read();
        inner
            .index
            .children_of(id)
            .iter()
            .filter_map(|child| inner.branches.get(child))
            .cloned()
            .collect()
    }

    pub fn get_child_ids(&self, id: &str) -> Vec<String> {
        self.inner.read().index.children_of(id).to_vec()
    }

    /// Everything below `id`, depth-first in sibling order.
    pub fn get_descendants(&self, id: &str) -> Vec<Branch> {
        let inner = self.inner.read();
        inner
            .index
            .descendants(id)
            .iter()
            .filter_map(|d| inner.branches.get(d))
            .cloned()
            .collect()
    }

    /// Ancestors of `id`, nearest first. A corrupt chain is cut at the first
    /// repeated node.
    pub fn get_ancestors(&self, id: &str) -> Vec<Branch> {
        let inner = self.inner.read();
        let (ids, cycle) = inner.ancestor_ids(id);
        if cycle {
            tracing::warn!(branch_id = %id, "Cycle in parent chain");
        }
        ids.iter()
            .filter_map(|a| inner.branches.get(a))
            .cloned()
            .collect()
    }

    /// Branch ids whose parent chain loops back on itself, one per cycle.
    pub fn find_cycles(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut members = Vec::new();
        let mut cleared: HashSet<String> = HashSet::new();

        let mut ids: Vec<&String> = inner.branches.keys().collect();
        ids.sort();

        for id in ids {
            if cleared.contains(id) {
                continue;
            }
            let mut path = vec![id.clone()];
            let mut on_path: HashSet<String> = HashSet::from([id.clone()]);
            let mut current = inner.branches.get(id).and_then(|b| b.parent_id.clone());

            while let Some(next) = current {
                if cleared.contains(&next) || !inner.branches.contains_key(&next) {
                    break;
                }
                if !on_path.insert(next.clone()) {
                    members.push(next.clone());
                    break;
                }
                path.push(next.clone());
                current = inner.branches.get(&next).and_then(|b| b.parent_id.clone());
            }
            cleared.extend(path);
        }

        members
    }

    /// Parentless branches, ROOT first.
    pub fn get_roots(&self) -> Vec<Branch> {
        self.inner.read().roots().into_iter().cloned().collect()
    }

    /// All branches, oldest first.
    pub fn get_all(&self) -> Vec<Branch> {
        let inner = self.inner.read();
        let mut all: Vec<Branch> = inner.branches.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn count(&self) -> usize {
        self.inner.read().branches.len()
    }

    /// Create ROOT if absent, otherwise point it at `tab_id`.
    ///
    /// A newly created ROOT adopts every parentless branch.
    pub fn ensure_root(&self, tab_id: Option<String>) -> Branch {
        let mut inner = self.inner.write();
        let mut writes = Writes::default();

        if let Some(existing) = inner.branches.get(ROOT_BRANCH_ID) {
            let old_tab = existing.tab_id.clone();
            if old_tab != tab_id {
                inner.map_tab(ROOT_BRANCH_ID, old_tab.as_deref(), tab_id.as_deref());
                if let Some(root) = inner.branches.get_mut(ROOT_BRANCH_ID) {
                    root.tab_id = tab_id.clone();
                }
                writes.put(ROOT_BRANCH_ID);
                tracing::info!(tab_id = ?tab_id, previous = ?old_tab, "Reassigned ROOT tab");
            }
        } else {
            let root = Branch::root(tab_id.clone());
            inner.branches.insert(ROOT_BRANCH_ID.to_string(), root);
            inner.map_tab(ROOT_BRANCH_ID, None, tab_id.as_deref());
            writes.put(ROOT_BRANCH_ID);

            let orphans: Vec<String> = inner
                .roots()
                .into_iter()
                .filter(|b| !b.is_root())
                .map(|b| b.id.clone())
                .collect();
            for orphan in &orphans {
                inner.attach(orphan, ROOT_BRANCH_ID, None, &mut writes);
            }

            tracing::info!(tab_id = ?tab_id, adopted = orphans.len(), "Created ROOT branch");
        }

        let root = inner.branches[ROOT_BRANCH_ID].clone();
        self.commit(&inner, writes);
        root
    }

    /// Nested view of the whole store, one tree per parentless branch.
    pub fn get_tree(&self) -> Vec<BranchNode> {
        let inner = self.inner.read();
        let mut seen = HashSet::new();
        let roots: Vec<String> = inner.roots().into_iter().map(|b| b.id.clone()).collect();
        roots
            .iter()
            .filter_map(|id| inner.node(id, &mut seen))
            .collect()
    }

    /// Record a navigation in the branch's history.
    pub fn add_to_history(
        &self,
        id: &str,
        url: &str,
        title: &str,
        options: HistoryOptions,
    ) -> bool {
        let mut inner = self.inner.write();
        let Some(branch) = inner.branches.get_mut(id) else {
            return false;
        };

        let outcome = branch.history.record(url, title, Utc::now(), options);
        tracing::debug!(
            branch_id = %id,
            url = %url,
            outcome = ?outcome,
            index = branch.history.index(),
            "Recorded history"
        );

        if outcome != RecordOutcome::Skipped {
            let mut writes = Writes::default();
            writes.put(id);
            self.commit(&inner, writes);
        }
        true
    }

    /// Move the cursor without touching the log. The caller performs the
    /// actual navigation with the returned entry.
    pub fn navigate_to_history_index(&self, id: &str, index: usize) -> Option<HistoryEntry> {
        let mut inner = self.inner.write();
        let branch = inner.branches.get_mut(id)?;
        let entry = branch.history.navigate_to(index).cloned();

        match &entry {
            Some(entry) => {
                tracing::debug!(branch_id = %id, index, url = %entry.url, "Moved history cursor");
                let mut writes = Writes::default();
                writes.put(id);
                self.commit(&inner, writes);
            }
            None => {
                tracing::debug!(branch_id = %id, index, "History index out of range");
            }
        }
        entry
    }

    pub fn get_history_index(&self, id: &str) -> Option<i64> {
        self.inner.read().branches.get(id).map(|b| b.history.index())
    }

    pub fn get_history_with_position(&self, id: &str) -> Option<HistoryView> {
        self.inner.read().branches.get(id).map(|b| b.history.view())
    }

    /// Set the branch title and fill in the title of the newest history
    /// entry if it belongs to the current url and has none yet.
    pub fn update_title(&self, id: &str, title: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(branch) = inner.branches.get_mut(id) else {
            return false;
        };

        branch.title = title.to_string();
        let url = branch.url.clone();
        if let Some(last) = branch.history.last_mut() {
            if last.url == url && last.title.is_empty() {
                last.title = title.to_string();
            }
        }

        let mut writes = Writes::default();
        writes.put(id);
        self.commit(&inner, writes);
        true
    }
}

impl Clone for BranchStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            persistence: self.persistence.clone(),
            loaded: Arc::clone(&self.loaded),
        }
    }
}

impl Default for BranchStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
