//! Database module: entity models and SQL repositories.
//!
//! - `model`: row/view structs returned by repositories.
//! - `repo`: SQL-only functions; business logic stays in `sync`.
//!
//! External modules import from `mls_sync::db` — the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use model::{NewProfile, RunLogRow};
pub use repo::*;
