//! Lifecycle Bridge
//!
//! Turns host tab events into branch store mutations. Owns the rules for who
//! becomes ROOT and where a new branch hangs.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;

use arbor_branches::{BranchPatch, BranchState, BranchStore, HistoryEntry, HistoryOptions};

use crate::decision::{decide_tab_added, RootStatus, TabAddedDecision};
use crate::tab::{AddOptions, TabChange, TabData, TabEvent, TabSource};
use crate::token::BreadcrumbTokens;

/// Wakes the reconciler after a tab goes away.
pub type ReconcileTrigger = mpsc::UnboundedSender<()>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Branches loaded from the durable snapshot
    pub restored: usize,
    /// Live tabs that received a branch during the migration sweep
    pub migrated: usize,
}

pub struct LifecycleBridge {
    store: BranchStore,
    tabs: Arc<dyn TabSource>,
    tokens: BreadcrumbTokens,
    reconcile: Option<ReconcileTrigger>,
}

impl LifecycleBridge {
    pub fn new(store: BranchStore, tabs: Arc<dyn TabSource>) -> Self {
        Self {
            store,
            tabs,
            tokens: BreadcrumbTokens::new(),
            reconcile: None,
        }
    }

    pub fn with_reconcile_trigger(mut self, trigger: ReconcileTrigger) -> Self {
        self.reconcile = Some(trigger);
        self
    }

    pub fn store(&self) -> &BranchStore {
        &self.store
    }

    /// Load the snapshot, then give every unlinked live tab a branch.
    pub async fn start(&self) -> StartupReport {
        let restored = self.store.load_persisted().await;
        let migrated = self.migrate_live_tabs();

        tracing::info!(restored, migrated, "Lifecycle bridge started");
        StartupReport { restored, migrated }
    }

    /// Link every live tab that has no branch yet. The first becomes ROOT if
    /// there is none; the rest go under ROOT. Safe to re-run.
    pub fn migrate_live_tabs(&self) -> usize {
        let mut migrated = 0;

        for tab in self.tabs.live_tabs() {
            if let Some(linked) = tab
                .data
                .branch_id
                .as_deref()
                .filter(|id| self.store.contains(id))
            {
                tracing::trace!(tab_id = %tab.tab_id, branch_id = %linked, "Tab already linked");
                continue;
            }

            if let Some(existing) = self.store.get_by_tab_id(&tab.tab_id) {
                self.tabs.assign_branch(&tab.tab_id, &existing.id);
                continue;
            }

            let branch_id = if self.store.root().is_none() {
                self.store.ensure_root(Some(tab.tab_id.clone()));
                let root = arbor_branches::ROOT_BRANCH_ID.to_string();
                self.seed(&root, &tab.data);
                Some(root)
            } else {
                self.create_child(&tab.tab_id, &tab.data, None)
            };

            if let Some(branch_id) = branch_id {
                self.tabs.assign_branch(&tab.tab_id, &branch_id);
                migrated += 1;
            }
        }

        if migrated > 0 {
            tracing::info!(migrated, "Linked live tabs to branches");
        }
        migrated
    }

    /// Drain host events until the sender side closes.
    pub async fn run(&self, mut events: mpsc::Receiver<TabEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        tracing::debug!("Tab event stream closed");
    }

    pub fn handle(&self, event: TabEvent) {
        match event {
            TabEvent::Added {
                tab_id,
                data,
                options,
                container_id,
            } => {
                tracing::debug!(tab_id = %tab_id, container_id = %container_id, "Tab added");
                self.on_tab_added(&tab_id, &data, options);
            }
            TabEvent::Destroyed {
                tab_id,
                container_id,
            } => {
                tracing::debug!(tab_id = %tab_id, container_id = %container_id, "Tab destroyed");
                self.on_tab_destroyed(&tab_id);
            }
            TabEvent::Updated { tab_id, change, .. } => match change {
                TabChange::Url(url) => {
                    self.on_url_changed(&tab_id, &url);
                }
                TabChange::Title(title) => {
                    self.on_title_changed(&tab_id, &title);
                }
            },
            TabEvent::Selected { tab_id, .. } => {
                self.on_tab_selected(&tab_id);
            }
            TabEvent::Suspended { tab_id, .. } => {
                self.on_tab_suspended(&tab_id);
            }
        }
    }

    fn root_status(&self) -> RootStatus {
        match self.store.root() {
            None => RootStatus::Missing,
            Some(root) => match root.tab_id {
                Some(tab_id) if self.tabs.tab_exists(&tab_id) => RootStatus::Live,
                _ => RootStatus::Stale,
            },
        }
    }

    /// Returns the branch now linked to the tab.
    pub fn on_tab_added(&self, tab_id: &str, data: &TabData, options: AddOptions) -> Option<String> {
        let known = self.store.get_by_tab_id(tab_id);
        let already_linked = data.branch_id.is_some() || known.is_some();

        let parent = data
            .parent_branch_id
            .as_deref()
            .filter(|id| self.store.contains(id));
        if parent.is_none() && data.parent_branch_id.is_some() {
            tracing::debug!(
                tab_id = %tab_id,
                parent_branch_id = ?data.parent_branch_id,
                "Opener branch is gone, falling back to ROOT"
            );
        }

        let decision = decide_tab_added(already_linked, self.root_status(), parent);
        tracing::debug!(
            tab_id = %tab_id,
            ?decision,
            background = options.background,
            "Tab added decision"
        );

        let branch_id = match decision {
            TabAddedDecision::Ignore => {
                if let (None, Some(known)) = (&data.branch_id, &known) {
                    self.tabs.assign_branch(tab_id, &known.id);
                }
                return data.branch_id.clone().or(known.map(|b| b.id));
            }
            TabAddedDecision::BecomeRoot | TabAddedDecision::ReuseRoot => {
                let root = self.store.ensure_root(Some(tab_id.to_string()));
                self.seed(&root.id, data);
                Some(root.id)
            }
            TabAddedDecision::CreateChild { parent } => {
                self.create_child(tab_id, data, parent.as_deref())
            }
        };

        if let Some(branch_id) = &branch_id {
            self.tabs.assign_branch(tab_id, branch_id);
        }
        branch_id
    }

    fn create_child(&self, tab_id: &str, data: &TabData, parent: Option<&str>) -> Option<String> {
        let parent = parent.unwrap_or(arbor_branches::ROOT_BRANCH_ID);
        let id = self.store.create(
            Some(tab_id.to_string()),
            Some(parent),
            data.url.clone(),
            data.title.clone(),
        )?;
        if !data.url.is_empty() {
            self.store
                .add_to_history(&id, &data.url, &data.title, HistoryOptions::default());
        }
        Some(id)
    }

    /// Point an existing branch at the tab's current page.
    fn seed(&self, branch_id: &str, data: &TabData) {
        let patch = BranchPatch {
            url: Some(data.url.clone()),
            title: Some(data.title.clone()),
            last_active_at: Some(Utc::now()),
            state: Some(BranchState::Awake),
            ..Default::default()
        };
        self.store.update(branch_id, patch);
        if !data.url.is_empty() {
            self.store
                .add_to_history(branch_id, &data.url, &data.title, HistoryOptions::default());
        }
    }

    /// Destroy the tab's branch and its subtree. ROOT outlives its tab.
    pub fn on_tab_destroyed(&self, tab_id: &str) -> bool {
        self.tokens.discard(tab_id);

        let destroyed = match self.store.get_by_tab_id(tab_id) {
            None => {
                tracing::debug!(tab_id = %tab_id, "Destroyed tab had no branch");
                false
            }
            Some(branch) if branch.is_root() => {
                tracing::debug!(tab_id = %tab_id, "ROOT tab closed, keeping ROOT");
                false
            }
            Some(branch) => self.store.destroy_with_children(&branch.id),
        };

        if let Some(trigger) = &self.reconcile {
            if trigger.send(()).is_err() {
                tracing::debug!("Reconciler is not running");
            }
        }
        destroyed
    }

    pub fn on_url_changed(&self, tab_id: &str, url: &str) -> bool {
        let Some(branch) = self.store.get_by_tab_id(tab_id) else {
            tracing::debug!(tab_id = %tab_id, "Url change for unknown tab");
            return false;
        };

        let is_breadcrumb_nav = self.tokens.consume(tab_id);

        // A reload keeps its title; a new page waits for the title event
        let title = if branch.url == url {
            branch.title.clone()
        } else {
            String::new()
        };

        self.store.update(&branch.id, BranchPatch::url(url));
        self.store.add_to_history(
            &branch.id,
            url,
            &title,
            HistoryOptions { is_breadcrumb_nav },
        )
    }

    pub fn on_title_changed(&self, tab_id: &str, title: &str) -> bool {
        match self.store.get_by_tab_id(tab_id) {
            Some(branch) => self.store.update_title(&branch.id, title),
            None => false,
        }
    }

    pub fn on_tab_selected(&self, tab_id: &str) -> bool {
        let Some(branch) = self.store.get_by_tab_id(tab_id) else {
            return false;
        };
        let patch = BranchPatch {
            last_active_at: Some(Utc::now()),
            state: Some(BranchState::Awake),
            ..Default::default()
        };
        self.store.update(&branch.id, patch).is_some()
    }

    pub fn on_tab_suspended(&self, tab_id: &str) -> bool {
        let Some(branch) = self.store.get_by_tab_id(tab_id) else {
            return false;
        };
        let patch = BranchPatch {
            state: Some(BranchState::Sleeping),
            ..Default::default()
        };
        self.store.update(&branch.id, patch).is_some()
    }

    /// Jump a branch to an earlier history entry. The host should load the
    /// returned entry; the url change it produces will not be recorded as a
    /// new visit.
    pub fn navigate_breadcrumb(&self, branch_id: &str, index: usize) -> Option<HistoryEntry> {
        let entry = self.store.navigate_to_history_index(branch_id, index)?;
        if let Some(tab_id) = self.store.get(branch_id).and_then(|b| b.tab_id) {
            self.tokens.arm(&tab_id);
        }
        Some(entry)
    }
}
