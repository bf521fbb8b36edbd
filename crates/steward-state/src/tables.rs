//! redb table definitions for the Steward checkpoint store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Application declarations keyed by application name.
pub const APPLICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("applications");
