//! Core types for the caching system.

/// Result from a cache operation, including metadata about where the data came from.
///
/// Callers that only want the records can take `data`; callers that need to
/// distinguish "served fresh" from "served degraded" inspect `source`.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Create a new cache result from the fresh (within-TTL) slot.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Fresh,
    }
  }

  /// Create a new cache result from the stale fallback slot.
  pub fn degraded(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Stale,
    }
  }

  /// Whether this result came from the stale fallback (i.e. the upstream
  /// fetch failed and the last known-good copy was served instead).
  #[allow(dead_code)]
  pub fn is_degraded(&self) -> bool {
    self.source == CacheSource::Stale
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the directory server, cached on the way out
  Network,
  /// Data from the TTL-bound cache slot, still within its freshness window
  Fresh,
  /// Data from the permanent fallback slot, served because the fetch failed
  Stale,
}
