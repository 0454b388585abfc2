//! Branch data structure
//!
//! A branch ties one tab to its place in the tree and to the log of pages it
//! visited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::HistoryTrack;

/// Fixed id of the permanent, parentless branch.
pub const ROOT_BRANCH_ID: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchState {
    /// The tab is loaded
    #[default]
    Awake,
    /// The tab has been suspended by the host
    Sleeping,
}

impl BranchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchState::Awake => "awake",
            BranchState::Sleeping => "sleeping",
        }
    }
}

impl std::fmt::Display for BranchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BranchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "awake" => Ok(BranchState::Awake),
            "sleeping" => Ok(BranchState::Sleeping),
            _ => Err(format!("Unknown branch state: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    /// Unique identifier
    pub id: String,
    /// Host tab this branch follows, if any
    pub tab_id: Option<String>,
    /// `None` only for ROOT (and for orphans awaiting reconciliation)
    pub parent_id: Option<String>,
    /// Current URL
    pub url: String,
    /// Current page title
    pub title: String,
    /// Navigation log and cursor
    pub history: HistoryTrack,
    /// Position among the parent's children
    pub sibling_index: u32,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub state: BranchState,
}

impl Branch {
    pub fn new(
        tab_id: Option<String>,
        parent_id: Option<String>,
        url: String,
        title: String,
    ) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), tab_id, parent_id, url, title)
    }

    pub fn root(tab_id: Option<String>) -> Self {
        Self::with_id(
            ROOT_BRANCH_ID.to_string(),
            tab_id,
            None,
            String::new(),
            String::new(),
        )
    }

    fn with_id(
        id: String,
        tab_id: Option<String>,
        parent_id: Option<String>,
        url: String,
        title: String,
    ) -> Self {
        let now = Utc::now();

        Self {
            id,
            tab_id,
            parent_id,
            url,
            title,
            history: HistoryTrack::new(),
            sibling_index: 0,
            created_at: now,
            last_active_at: now,
            state: BranchState::Awake,
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_BRANCH_ID
    }

    pub(crate) fn apply(&mut self, patch: &BranchPatch) {
        if let Some(tab_id) = &patch.tab_id {
            self.tab_id = tab_id.clone();
        }
        if let Some(url) = &patch.url {
            self.url = url.clone();
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(at) = patch.last_active_at {
            self.last_active_at = at;
        }
    }
}

/// Shallow partial update for [`crate::BranchStore::update`].
///
/// `None` fields are left untouched. A `parent_id` change is validated like
/// [`crate::BranchStore::set_parent`] and appends the branch to its new
/// parent's children; the whole patch is refused if that move is illegal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BranchPatch {
    pub tab_id: Option<Option<String>>,
    pub parent_id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub state: Option<BranchState>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl BranchPatch {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn tab(tab_id: Option<String>) -> Self {
        Self {
            tab_id: Some(tab_id),
            ..Default::default()
        }
    }
}

/// A branch with its children nested, for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchNode {
    #[serde(flatten)]
    pub branch: Branch,
    pub children: Vec<BranchNode>,
}

impl BranchNode {
    /// Number of nodes in this subtree, including itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(BranchNode::size).sum::<usize>()
    }
}
