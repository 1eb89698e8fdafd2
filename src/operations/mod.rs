//! # Operations
//!
//! Request-scoped getters. Each one compiles everything it needs up front, so
//! a malformed request fails before any statement reaches the database, then
//! runs through a [`StorageExecutor`].

pub mod resources;
pub mod stats;
pub mod storage;

pub use resources::{HasManyGetter, ResourceGetter, ResourcesGetter};
pub use stats::{LineStatGetter, PieStatGetter};
pub use storage::{COUNT_ALIAS, StorageExecutor};
