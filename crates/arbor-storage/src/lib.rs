//! Arbor Storage Layer
//!
//! SQLite-backed restart cache. Nothing stored here is authoritative: the
//! in-memory branch store wins, and this database only seeds the next start.

mod database;
mod error;
mod migrations;

pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
