//! Arbor Restructure
//!
//! Everything that moves branches after they are created:
//! - drag-and-drop reparenting with cycle checks
//! - pointer drop inference over the rendered rows
//! - reconciliation against the host's live tabs, run on a schedule

mod drop_target;
mod error;
mod reconcile;
mod reparent;
mod scheduler;

pub use drop_target::{resolve_drop, DropGeometry, DropPlacement, DropSide, Pointer, VisibleRow};
pub use error::ReparentError;
pub use reconcile::{ReconcileReport, Reconciler};
pub use reparent::ReparentEngine;
pub use scheduler::{ReconcileHandle, ReconcileScheduler, ReconcileSettings};
