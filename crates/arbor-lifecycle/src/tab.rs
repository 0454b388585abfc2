//! Host tab vocabulary
//!
//! The engine never owns tabs. It hears about them through [`TabEvent`]s and
//! asks the host about the live set through [`TabSource`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Data the host keeps on each tab.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabData {
    pub url: String,
    pub title: String,
    /// Branch of the tab whose link opened this one
    pub parent_branch_id: Option<String>,
    /// Branch already linked to this tab
    pub branch_id: Option<String>,
}

impl TabData {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn opened_from(mut self, parent_branch_id: impl Into<String>) -> Self {
        self.parent_branch_id = Some(parent_branch_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOptions {
    /// Opened without taking focus
    pub background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabChange {
    Url(String),
    Title(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Added {
        tab_id: String,
        data: TabData,
        options: AddOptions,
        container_id: String,
    },
    Destroyed {
        tab_id: String,
        container_id: String,
    },
    Updated {
        tab_id: String,
        change: TabChange,
        container_id: String,
    },
    Selected {
        tab_id: String,
        container_id: String,
    },
    /// The host unloaded the tab to save memory
    Suspended {
        tab_id: String,
        container_id: String,
    },
}

/// A tab the host currently has open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTab {
    pub tab_id: String,
    pub data: TabData,
}

/// Queries the engine makes against the host's live tabs.
pub trait TabSource: Send + Sync {
    fn tab_exists(&self, tab_id: &str) -> bool;

    /// Open tabs in host order.
    fn live_tabs(&self) -> Vec<LiveTab>;

    /// Store the linked branch id in the tab's data.
    fn assign_branch(&self, tab_id: &str, branch_id: &str);
}

/// A [`TabSource`] kept in process, for hosts that mirror their tab list
/// into the engine.
#[derive(Debug, Default)]
pub struct MemoryTabSource {
    tabs: RwLock<Vec<LiveTab>>,
}

impl MemoryTabSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, tab_id: impl Into<String>, data: TabData) {
        let tab_id = tab_id.into();
        let mut tabs = self.tabs.write();
        match tabs.iter_mut().find(|t| t.tab_id == tab_id) {
            Some(existing) => existing.data = data,
            None => tabs.push(LiveTab { tab_id, data }),
        }
    }

    pub fn close(&self, tab_id: &str) -> bool {
        let mut tabs = self.tabs.write();
        let before = tabs.len();
        tabs.retain(|t| t.tab_id != tab_id);
        tabs.len() != before
    }

    pub fn branch_of(&self, tab_id: &str) -> Option<String> {
        self.tabs
            .read()
            .iter()
            .find(|t| t.tab_id == tab_id)
            .and_then(|t| t.data.branch_id.clone())
    }
}

impl TabSource for MemoryTabSource {
    fn tab_exists(&self, tab_id: &str) -> bool {
        self.tabs.read().iter().any(|t| t.tab_id == tab_id)
    }

    fn live_tabs(&self) -> Vec<LiveTab> {
        self.tabs.read().clone()
    }

    fn assign_branch(&self, tab_id: &str, branch_id: &str) {
        if let Some(tab) = self.tabs.write().iter_mut().find(|t| t.tab_id == tab_id) {
            tab.data.branch_id = Some(branch_id.to_string());
        }
    }
}
