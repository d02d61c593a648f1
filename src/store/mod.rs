//! Persistent store for links, files and categories.
//!
//! SQLite-backed. Every processor restart starts from what is recorded
//! here, so all status transitions go through this module.

pub mod db;
pub mod error;
pub mod schema;
pub mod types;

pub use db::{SqliteStore, Store};
pub use error::StoreError;
pub use types::{
    Category, FileProgress, FileRecord, FileStatus, Link, LinkStatus, NewFile, ProgressWrite,
    StoreSummary,
};
