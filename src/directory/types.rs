//! Directory record type shared by the source and the cache.

use serde::{Deserialize, Serialize};

/// One directory entry as returned by the upstream source.
///
/// Every field is optional; the source carries no identifier and guarantees
/// no ordering. Records are immutable once fetched and a full list replaces
/// any prior list atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
  pub name: Option<String>,
  pub email: Option<String>,
  pub title: Option<String>,
  pub department: Option<String>,
  pub phone: Option<String>,
}

impl DirectoryRecord {
  /// Name used for display and sorting; records without one render blank.
  pub fn display_name(&self) -> &str {
    self.name.as_deref().unwrap_or("")
  }
}
