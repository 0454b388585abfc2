//! Branch error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BranchError {
    #[error("Branch not found: {0}")]
    NotFound(String),

    #[error("ROOT cannot be moved or destroyed")]
    RootImmutable,

    #[error("Branch {0} cannot be its own parent")]
    SelfParent(String),

    #[error("Moving {branch} under {parent} would create a cycle")]
    Cycle { branch: String, parent: String },

    #[error("Storage error: {0}")]
    Storage(#[from] arbor_storage::StorageError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence worker unavailable: {0}")]
    Worker(String),
}
