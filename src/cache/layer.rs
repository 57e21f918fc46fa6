//! Cache layer that orchestrates the fresh/stale slots with upstream fetching.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use super::storage::CacheStore;
use super::traits::CacheResult;
use crate::config::CacheConfig;

/// Read-through cache in front of a directory source.
///
/// This layer sits between callers and the network fetch, serving the most
/// recent known-good listing with minimal upstream load. As long as any fetch
/// has succeeded since the last purge, callers never see a hard failure: an
/// unreachable server degrades to a slightly outdated directory instead of an
/// unavailable one.
pub struct DirectoryCache<S: CacheStore> {
  storage: Arc<S>,
  /// How long the fresh slot answers reads before the next upstream fetch
  ttl: Duration,
  /// Storage namespace; independent instances use distinct keys
  cache_key: String,
}

impl<S: CacheStore> DirectoryCache<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, config: &CacheConfig) -> Result<Self> {
    if config.ttl_seconds == 0 {
      return Err(eyre!("cache ttl_seconds must be greater than zero"));
    }

    Ok(Self {
      storage: Arc::new(storage),
      ttl: Duration::seconds(config.ttl_seconds as i64),
      cache_key: config.cache_key.clone(),
    })
  }

  /// Override the TTL with sub-second resolution.
  #[allow(dead_code)]
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Returns the cached list if its expiry has not passed. No side effects.
  pub fn get_fresh<T: DeserializeOwned>(&self) -> Result<Option<Vec<T>>> {
    self.storage.get_fresh(&self.cache_key)
  }

  /// Returns the permanent fallback copy regardless of age; absent only if
  /// no fetch has succeeded since the last purge.
  pub fn get_stale<T: DeserializeOwned>(&self) -> Result<Option<Vec<T>>> {
    self.storage.get_stale(&self.cache_key)
  }

  /// Write both slots from one successful fetch: the fresh slot expires at
  /// now + TTL, the stale slot never does. An empty list is valid data.
  pub fn store<T: Serialize>(&self, records: &[T]) -> Result<()> {
    let expires_at = Utc::now() + self.ttl;
    self.storage.store(&self.cache_key, records, expires_at)
  }

  /// Clear both slots unconditionally. Used on configuration change (old
  /// cached identities may now be wrong) and on manual cache clears.
  pub fn purge(&self) -> Result<()> {
    self.storage.purge(&self.cache_key)
  }

  /// Fetch the directory with a cache-first strategy.
  ///
  /// 1. Fresh slot present: return it, no network call
  /// 2. Otherwise invoke `fetch`
  /// 3. On success, write both slots and return the new data
  /// 4. On failure, serve the stale slot if one exists; propagate the
  ///    failure only when there is truly nothing to serve
  pub async fn read_through<T, F, Fut>(&self, fetch: F) -> Result<CacheResult<Vec<T>>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    if let Some(records) = self.get_fresh()? {
      return Ok(CacheResult::from_cache(records));
    }

    match fetch().await {
      Ok(records) => {
        self.store(&records)?;
        Ok(CacheResult::from_network(records))
      }
      Err(err) => match self.get_stale()? {
        Some(records) => {
          // Swallowed from the caller's perspective, but kept observable.
          warn!(error = %err, "directory fetch failed, serving stale copy");
          Ok(CacheResult::degraded(records))
        }
        None => Err(err),
      },
    }
  }

  /// Digest recorded by the last `record_settings_digest` for this key.
  pub fn settings_digest(&self) -> Result<Option<String>> {
    self.storage.get_settings_digest(&self.cache_key)
  }

  /// Record the digest of the settings this cache was populated under.
  pub fn record_settings_digest(&self, digest: &str) -> Result<()> {
    self.storage.set_settings_digest(&self.cache_key, digest)
  }
}

impl<S: CacheStore> Clone for DirectoryCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      ttl: self.ttl,
      cache_key: self.cache_key.clone(),
    }
  }
}
