mod cache;
mod config;
mod directory;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::cache::{DirectoryCache, SqliteStore};
use crate::config::Config;
use crate::directory::{CachedDirectory, DirectoryRecord, LdapDirectory};

#[derive(Parser, Debug)]
#[command(name = "staffdir")]
#[command(about = "LDAP staff directory with a read-through, stale-fallback cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/staffdir/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List the directory (served from cache when fresh)
  List {
    /// Only show people from this department
    #[arg(short, long)]
    department: Option<String>,

    /// Emit JSON instead of a table
    #[arg(long)]
    json: bool,
  },
  /// Test the LDAP connection with the current settings, bypassing the cache
  Test,
  /// Clear the cache, including the stale fallback copy
  Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::List { department, json } => {
      let directory = CachedDirectory::new(&config)?;
      let result = directory.users().await?;

      let mut users = result.data;
      if let Some(department) = &department {
        users.retain(|user| {
          user
            .department
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case(department))
        });
      }
      sort_by_name(&mut users);

      if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
      } else {
        print!("{}", render_table(&users));
      }
    }
    Command::Test => {
      let source = LdapDirectory::new(&config.ldap)?;
      let count = source.test_connection().await?;
      println!("Connection successful. {} user(s) found.", count);
    }
    Command::Purge => {
      // Purging never contacts the server, so no LDAP client (or bind
      // password) is needed here.
      let cache = DirectoryCache::new(SqliteStore::open()?, &config.cache)?;
      cache.purge()?;
      println!("Cache cleared.");
    }
  }

  Ok(())
}

/// Sort alphabetically by display name, case-insensitively. The source
/// guarantees no ordering; it is imposed here at render time.
fn sort_by_name(users: &mut [DirectoryRecord]) {
  users.sort_by_key(|user| user.display_name().to_lowercase());
}

fn render_table(users: &[DirectoryRecord]) -> String {
  let mut out = String::new();
  for user in users {
    out.push_str(&format!(
      "{}\t{}\t{}\t{}\t{}\n",
      user.display_name(),
      user.email.as_deref().unwrap_or("-"),
      user.title.as_deref().unwrap_or("-"),
      user.department.as_deref().unwrap_or("-"),
      user.phone.as_deref().unwrap_or("-"),
    ));
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn person(name: &str, department: Option<&str>) -> DirectoryRecord {
    DirectoryRecord {
      name: Some(name.to_string()),
      department: department.map(String::from),
      ..Default::default()
    }
  }

  #[test]
  fn sorts_case_insensitively() {
    let mut users = vec![
      person("charlie", None),
      person("Alice", None),
      person("Bob", None),
    ];
    sort_by_name(&mut users);

    let names: Vec<_> = users.iter().map(|u| u.display_name()).collect();
    assert_eq!(names, vec!["Alice", "Bob", "charlie"]);
  }

  #[test]
  fn nameless_records_sort_first_without_panicking() {
    let mut users = vec![person("Alice", None), DirectoryRecord::default()];
    sort_by_name(&mut users);
    assert_eq!(users[0].display_name(), "");
  }

  #[test]
  fn renders_placeholder_for_missing_fields() {
    let table = render_table(&[person("Alice", Some("R&D"))]);
    assert_eq!(table, "Alice\t-\t-\tR&D\t-\n");
  }
}
