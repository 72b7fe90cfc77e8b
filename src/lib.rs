//! Incremental MLS listing synchronization.
//!
//! Pulls filtered listing records from a Bridge-style OData API into a local
//! SQLite mirror, resolving related agents/offices/open-houses per page and
//! tracking a modification-timestamp watermark for resumable incremental runs.

pub mod bridge;
pub mod config;
pub mod db;
pub mod filter;
pub mod model;
pub mod normalize;
pub mod related;
pub mod sync;
