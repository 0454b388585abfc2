//! Tab-added policy
//!
//! Deciding what a new tab becomes is kept free of side effects so the rules
//! can be read (and tested) in one place.

/// What the store knows about ROOT when a tab appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootStatus {
    Missing,
    /// ROOT's tab is still open
    Live,
    /// ROOT has no tab, or its tab is gone
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabAddedDecision {
    /// The tab is already linked to a branch
    Ignore,
    BecomeRoot,
    /// Hand the existing ROOT to this tab
    ReuseRoot,
    /// New branch under `parent`, or under ROOT when `None`
    CreateChild { parent: Option<String> },
}

/// Decide how to treat a newly added tab.
///
/// `parent_branch_id` must already be checked against the store; pass `None`
/// for an unknown parent.
pub fn decide_tab_added(
    already_linked: bool,
    root: RootStatus,
    parent_branch_id: Option<&str>,
) -> TabAddedDecision {
    if already_linked {
        return TabAddedDecision::Ignore;
    }

    match root {
        RootStatus::Missing => TabAddedDecision::BecomeRoot,
        RootStatus::Stale => TabAddedDecision::ReuseRoot,
        RootStatus::Live => TabAddedDecision::CreateChild {
            parent: parent_branch_id.map(str::to_string),
        },
    }
}
