//! Arbor Tab Lifecycle
//!
//! Tabs come and go on the host's schedule. This crate listens to those
//! events and keeps the branch tree in step:
//! - the first tab becomes ROOT, and a replacement tab inherits a stale ROOT
//! - link-opened tabs hang under their opener
//! - closing a tab removes its whole subtree, except for ROOT

mod bridge;
mod decision;
mod tab;
mod token;

pub use bridge::{LifecycleBridge, ReconcileTrigger, StartupReport};
pub use decision::{decide_tab_added, RootStatus, TabAddedDecision};
pub use tab::{AddOptions, LiveTab, MemoryTabSource, TabChange, TabData, TabEvent, TabSource};
pub use token::BreadcrumbTokens;
