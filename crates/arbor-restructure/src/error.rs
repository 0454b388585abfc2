//! Restructure error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReparentError {
    #[error("ROOT cannot be moved")]
    MovingRoot,

    #[error("Branch {0} cannot be its own parent")]
    SelfParent(String),

    #[error("Target {parent} is inside the subtree of {branch}")]
    Cycle { branch: String, parent: String },

    #[error("Branch not found: {0}")]
    UnknownBranch(String),

    #[error("Target parent not found: {0}")]
    UnknownParent(String),
}
