//! LDAP directory source: connection, bind, and user retrieval.

use color_eyre::{eyre::eyre, Result};
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::config::{Config, LdapConfig};

use super::types::DirectoryRecord;

/// Attributes requested from the server, in record-field order.
const ATTRIBUTES: [&str; 6] = [
  "cn",
  "displayName",
  "mail",
  "title",
  "department",
  "telephoneNumber",
];

/// Network timeout for establishing the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory source backed by an LDAP/LDAPS server.
#[derive(Clone, Debug)]
pub struct LdapDirectory {
  config: LdapConfig,
  bind_password: String,
}

impl LdapDirectory {
  pub fn new(config: &LdapConfig) -> Result<Self> {
    let server = config.server.trim();
    if server.is_empty() {
      return Err(eyre!("LDAP server address is not configured"));
    }

    let url = Url::parse(server)
      .map_err(|e| eyre!("Invalid LDAP server URL '{}': {}", server, e))?;
    if !matches!(url.scheme(), "ldap" | "ldaps") {
      return Err(eyre!(
        "LDAP server URL must use an ldap:// or ldaps:// scheme, got '{}'",
        url.scheme()
      ));
    }

    // Anonymous bind needs no password; a bind DN does.
    let bind_password = if config.bind_dn.trim().is_empty() {
      String::new()
    } else {
      Config::get_bind_password()?
    };

    Ok(Self {
      config: config.clone(),
      bind_password,
    })
  }

  /// The resolved bind password; empty for an anonymous bind.
  pub(super) fn bind_password(&self) -> &str {
    &self.bind_password
  }

  /// Query the directory and return the normalized record list.
  ///
  /// Connect, bind, search, unbind. Each stage produces its own diagnostic
  /// so a connectivity self-test can report precisely what went wrong.
  pub async fn fetch_users(&self) -> Result<Vec<DirectoryRecord>> {
    let server = self.config.server.trim();

    let (conn, mut ldap) = LdapConnAsync::with_settings(self.conn_settings()?, server)
      .await
      .map_err(|e| eyre!("Could not connect to LDAP server {}: {}", server, e))?;
    ldap3::drive!(conn);

    ldap
      .simple_bind(self.config.bind_dn.trim(), &self.bind_password)
      .await
      .and_then(|res| res.success())
      .map_err(|e| eyre!("LDAP bind failed: {}", e))?;

    let (entries, _) = ldap
      .search(
        self.config.base_ou.trim(),
        Scope::Subtree,
        &self.search_filter(),
        ATTRIBUTES.to_vec(),
      )
      .await
      .and_then(|res| res.success())
      .map_err(|e| eyre!("LDAP search failed: {}", e))?;

    let users = entries
      .into_iter()
      .map(|entry| record_from_entry(SearchEntry::construct(entry)))
      .collect();

    // Best effort; the listing is already in hand.
    let _ = ldap.unbind().await;

    Ok(users)
  }

  /// Test the connection end to end, bypassing any cache.
  ///
  /// Returns the number of users found, or the stage-specific diagnostic.
  pub async fn test_connection(&self) -> Result<usize> {
    self.fetch_users().await.map(|users| users.len())
  }

  fn conn_settings(&self) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(CONNECT_TIMEOUT);

    if !self.config.verify_tls {
      // Self-signed certificates.
      settings = settings.set_no_tls_verify(true);
    } else if let Some(ca_cert) = &self.config.ca_cert {
      let pem = std::fs::read(ca_cert)
        .map_err(|e| eyre!("Failed to read CA certificate {}: {}", ca_cert.display(), e))?;
      let cert = native_tls::Certificate::from_pem(&pem)
        .map_err(|e| eyre!("Failed to parse CA certificate {}: {}", ca_cert.display(), e))?;
      let connector = native_tls::TlsConnector::builder()
        .add_root_certificate(cert)
        .build()
        .map_err(|e| eyre!("Failed to build TLS connector: {}", e))?;
      settings = settings.set_connector(connector);
    }

    Ok(settings)
  }

  fn search_filter(&self) -> String {
    if self.config.exclude_disabled {
      // Active Directory: userAccountControl bit 2 marks disabled accounts.
      "(&(objectClass=person)(mail=*)(!(userAccountControl:1.2.840.113556.1.4.803:=2)))"
        .to_string()
    } else {
      "(&(objectClass=person)(mail=*))".to_string()
    }
  }
}

/// Map one search entry onto a directory record.
///
/// Attribute names are matched case-insensitively; displayName falls back to
/// cn for the name. Empty values are treated as absent.
fn record_from_entry(entry: SearchEntry) -> DirectoryRecord {
  let attrs: HashMap<String, Vec<String>> = entry
    .attrs
    .into_iter()
    .map(|(k, v)| (k.to_lowercase(), v))
    .collect();

  let name = first_value(&attrs, "displayname").or_else(|| first_value(&attrs, "cn"));

  DirectoryRecord {
    name,
    email: first_value(&attrs, "mail"),
    title: first_value(&attrs, "title"),
    department: first_value(&attrs, "department"),
    phone: first_value(&attrs, "telephonenumber"),
  }
}

fn first_value(attrs: &HashMap<String, Vec<String>>, name: &str) -> Option<String> {
  attrs
    .get(name)
    .and_then(|values| values.first())
    .filter(|value| !value.is_empty())
    .cloned()
}
