//! Presto statement protocol
//!
//! Submit a statement, then follow the engine-supplied `nextUri` until a page
//! without one arrives.

pub mod client;
pub mod drain;
pub mod results;

pub use client::{ClientError, PageResponse, PrestoClient};
pub use drain::{drain_discarding, DrainError};

/// Session headers understood by the engine
pub const USER_HEADER: &str = "X-Presto-User";
pub const CATALOG_HEADER: &str = "X-Presto-Catalog";
pub const SCHEMA_HEADER: &str = "X-Presto-Schema";
pub const TIME_ZONE_HEADER: &str = "X-Presto-Time-Zone";
