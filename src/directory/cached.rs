//! Cached directory source that wraps the LDAP client with transparent caching.

use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::cache::{CacheResult, DirectoryCache, SqliteStore};
use crate::config::Config;

use super::ldap::LdapDirectory;
use super::types::DirectoryRecord;

/// Directory source with transparent read-through caching.
///
/// Wraps the underlying [`LdapDirectory`] and provides the same listing, but
/// serves cache hits without a network call and degrades to the last
/// known-good copy when the server is unreachable.
#[derive(Clone)]
pub struct CachedDirectory {
  source: LdapDirectory,
  cache: DirectoryCache<SqliteStore>,
}

impl CachedDirectory {
  /// Create a new cached directory source over the default store location.
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_store(SqliteStore::open()?, config)
  }

  /// Create a new cached directory source over the given store.
  ///
  /// A settings fingerprint is kept alongside the cache; when the effective
  /// configuration has changed since the cache was populated, both slots are
  /// purged before first use, since records fetched under the old settings
  /// may belong to a different directory.
  pub fn with_store(store: SqliteStore, config: &Config) -> Result<Self> {
    let source = LdapDirectory::new(&config.ldap)?;
    let cache = DirectoryCache::new(store, &config.cache)?;

    let directory = Self { source, cache };
    directory.purge_if_settings_changed(config)?;

    Ok(directory)
  }

  /// Get the directory listing through the cache.
  pub async fn users(&self) -> Result<CacheResult<Vec<DirectoryRecord>>> {
    let source = self.source.clone();
    self
      .cache
      .read_through(|| async move { source.fetch_users().await })
      .await
  }

  fn purge_if_settings_changed(&self, config: &Config) -> Result<()> {
    let digest = settings_digest(config, self.source.bind_password())?;
    if self.cache.settings_digest()?.as_deref() != Some(digest.as_str()) {
      self.cache.purge()?;
      self.cache.record_settings_digest(&digest)?;
    }
    Ok(())
  }
}

/// Fingerprint of the full configuration plus the resolved bind password.
///
/// Any settings change invalidates the cache, not just connection settings;
/// this mirrors the conservative purge-on-save the directory has always done.
fn settings_digest(config: &Config, bind_password: &str) -> Result<String> {
  let mut hasher = Sha256::new();
  hasher.update(serde_json::to_vec(config)?);
  hasher.update(bind_password);
  Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{CacheConfig, LdapConfig};
  use std::path::PathBuf;

  fn config(server: &str, ttl_seconds: u64) -> Config {
    Config {
      ldap: LdapConfig {
        server: server.to_string(),
        ..Default::default()
      },
      cache: CacheConfig {
        ttl_seconds,
        ..Default::default()
      },
    }
  }

  fn person(name: &str) -> DirectoryRecord {
    DirectoryRecord {
      name: Some(name.to_string()),
      ..Default::default()
    }
  }

  fn temp_db(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("staffdir-{}-{}.db", name, std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
  }

  fn open_cache(path: &PathBuf, config: &Config) -> DirectoryCache<SqliteStore> {
    DirectoryCache::new(SqliteStore::open_at(path).unwrap(), &config.cache).unwrap()
  }

  #[test]
  fn digest_is_stable_for_identical_settings() {
    let a = settings_digest(&config("ldaps://a.example.com", 3600), "s3cret").unwrap();
    let b = settings_digest(&config("ldaps://a.example.com", 3600), "s3cret").unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn digest_changes_with_any_setting() {
    let base = settings_digest(&config("ldaps://a.example.com", 3600), "s3cret").unwrap();
    let other_server = settings_digest(&config("ldaps://b.example.com", 3600), "s3cret").unwrap();
    // An unrelated, non-connection setting still invalidates.
    let other_ttl = settings_digest(&config("ldaps://a.example.com", 7200), "s3cret").unwrap();
    let other_password = settings_digest(&config("ldaps://a.example.com", 3600), "other").unwrap();

    assert_ne!(base, other_server);
    assert_ne!(base, other_ttl);
    assert_ne!(base, other_password);
  }

  #[test]
  fn unchanged_settings_keep_the_cache_across_rebuilds() {
    let path = temp_db("settings-stable");
    let config = config("ldaps://a.example.com", 3600);

    let _ = CachedDirectory::with_store(SqliteStore::open_at(&path).unwrap(), &config).unwrap();
    open_cache(&path, &config).store(&[person("alice")]).unwrap();

    let _ = CachedDirectory::with_store(SqliteStore::open_at(&path).unwrap(), &config).unwrap();

    let stale: Option<Vec<DirectoryRecord>> = open_cache(&path, &config).get_stale().unwrap();
    assert_eq!(stale, Some(vec![person("alice")]));

    let _ = std::fs::remove_file(&path);
  }

  #[test]
  fn purging_never_needs_the_ldap_client() {
    // Clearing the cache goes through DirectoryCache alone, so settings
    // that would require a bind password cannot block it.
    let path = temp_db("purge-no-creds");
    let mut config = config("ldaps://a.example.com", 3600);
    config.ldap.bind_dn = "cn=reader,dc=example,dc=com".to_string();

    let cache = open_cache(&path, &config);
    cache.store(&[person("alice")]).unwrap();

    cache.purge().unwrap();

    let fresh: Option<Vec<DirectoryRecord>> = cache.get_fresh().unwrap();
    let stale: Option<Vec<DirectoryRecord>> = cache.get_stale().unwrap();
    assert_eq!(fresh, None);
    assert_eq!(stale, None);

    let _ = std::fs::remove_file(&path);
  }

  #[test]
  fn changed_settings_purge_both_slots_before_first_use() {
    let path = temp_db("settings-change");
    let old = config("ldaps://a.example.com", 3600);

    let _ = CachedDirectory::with_store(SqliteStore::open_at(&path).unwrap(), &old).unwrap();
    open_cache(&path, &old).store(&[person("alice")]).unwrap();

    // Rebuilding under different settings drops the old identities.
    let new = config("ldaps://b.example.com", 3600);
    let _ = CachedDirectory::with_store(SqliteStore::open_at(&path).unwrap(), &new).unwrap();

    let cache = open_cache(&path, &new);
    let fresh: Option<Vec<DirectoryRecord>> = cache.get_fresh().unwrap();
    let stale: Option<Vec<DirectoryRecord>> = cache.get_stale().unwrap();
    assert_eq!(fresh, None);
    assert_eq!(stale, None);

    let _ = std::fs::remove_file(&path);
  }
}
