use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
  pub ldap: LdapConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdapConfig {
  /// Server URL, e.g. "ldaps://directory.example.com:636"
  pub server: String,
  /// DN to bind as; empty for an anonymous bind
  pub bind_dn: String,
  /// Search base, e.g. "ou=people,dc=example,dc=com"
  pub base_ou: String,
  /// Verify the server certificate (disable for self-signed certs)
  pub verify_tls: bool,
  /// Custom CA certificate (PEM) to trust instead of the system roots
  pub ca_cert: Option<PathBuf>,
  /// Exclude disabled Active Directory accounts from the listing
  pub exclude_disabled: bool,
}

impl Default for LdapConfig {
  fn default() -> Self {
    Self {
      server: String::new(),
      bind_dn: String::new(),
      base_ou: String::new(),
      verify_tls: true,
      ca_cert: None,
      exclude_disabled: false,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Freshness window for the cached listing, in seconds. Must be > 0.
  pub ttl_seconds: u64,
  /// Storage namespace; distinct keys give independent cache instances
  pub cache_key: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_seconds: 3600,
      cache_key: "staffdir_users".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./staffdir.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/staffdir/config.yaml
  /// 4. ~/.config/staffdir/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/staffdir/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("staffdir.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("staffdir").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.ttl_seconds == 0 {
      return Err(eyre!("cache.ttl_seconds must be greater than zero"));
    }
    Ok(config)
  }

  /// Get the LDAP bind password from the environment.
  ///
  /// The password never lives in the config file.
  pub fn get_bind_password() -> Result<String> {
    std::env::var("STAFFDIR_LDAP_PASSWORD").map_err(|_| {
      eyre!("LDAP bind password not found. Set the STAFFDIR_LDAP_PASSWORD environment variable.")
    })
  }
}
