//! Read-through caching layer for directory listings.
//!
//! This module provides a directory-agnostic caching mechanism that:
//! - Keeps a TTL-bound "fresh" slot that answers most reads without a network call
//! - Keeps a permanent "stale" slot, updated only alongside successful fetches
//!   and served when the upstream directory is unreachable
//! - Distinguishes `purge` (drop both slots) from ordinary TTL expiry

mod layer;
mod storage;
mod traits;

pub use layer::DirectoryCache;
pub use storage::SqliteStore;
pub use traits::CacheResult;

#[cfg(test)]
pub use storage::MemoryStore;
#[cfg(test)]
pub use traits::CacheSource;
