//! Redb table definitions for persistent metadata storage.

use redb::TableDefinition;

// Volume and snapshot records, keyed by id
pub const VOLUMES: TableDefinition<&str, &[u8]> = TableDefinition::new("volumes");

// Singleton allocation counters, keyed by counter name
pub const COUNTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("counters");

// Store-wide facts such as the export mode it was created with
pub const STORE_INFO: TableDefinition<&str, &str> = TableDefinition::new("store_info");

pub const EXPORT_MODE_KEY: &str = "export_mode";
pub const AOE_COUNTER_KEY: &str = "aoe";
pub const ISCSI_COUNTER_KEY: &str = "iscsi";
