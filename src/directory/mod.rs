//! Directory sources: the LDAP client and its cached wrapper.

mod cached;
mod ldap;
mod types;

pub use cached::CachedDirectory;
pub use ldap::LdapDirectory;
pub use types::DirectoryRecord;
