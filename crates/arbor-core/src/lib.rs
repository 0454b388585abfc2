//! Arbor Core
//!
//! Composition root for the branch tree. Hosts build a [`BranchTree`] from a
//! [`Config`] and their tab source, then feed it tab events.

mod config;
mod error;
mod tree;

pub use config::Config;
pub use error::CoreError;
pub use tree::{BranchTree, LAST_RECONCILE_KEY};

// Re-export the engine crates
pub use arbor_branches::{
    Branch, BranchError, BranchNode, BranchPatch, BranchState, BranchStore, HistoryEntry,
    HistoryOptions, HistoryView, ROOT_BRANCH_ID,
};
pub use arbor_lifecycle::{
    AddOptions, LifecycleBridge, LiveTab, MemoryTabSource, StartupReport, TabChange, TabData,
    TabEvent, TabSource,
};
pub use arbor_restructure::{
    DropGeometry, DropPlacement, DropSide, Pointer, ReconcileReport, Reconciler, ReparentEngine,
    ReparentError, VisibleRow,
};
pub use arbor_storage::{Database, StorageError};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A host may have installed its own subscriber already
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
