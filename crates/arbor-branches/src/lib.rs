//! Arbor Branches
//!
//! The branch tree: which tab was opened from which, and where each tab has
//! been. [`BranchStore`] owns the nodes in memory and mirrors them to a
//! [`BranchBackend`] on a best-effort basis.

mod branch;
mod error;
mod history;
mod index;
mod persistence;
mod sqlite;
mod store;

pub use branch::{Branch, BranchNode, BranchPatch, BranchState, ROOT_BRANCH_ID};
pub use error::BranchError;
pub use history::{
    HistoryEntry, HistoryOptions, HistoryTrack, HistoryView, RecordOutcome, MAX_HISTORY_ENTRIES,
};
pub use persistence::{BranchBackend, Persistence};
pub use sqlite::SqliteBranchBackend;
pub use store::BranchStore;

pub type Result<T> = std::result::Result<T, BranchError>;
