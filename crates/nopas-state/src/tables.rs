//! redb table definitions. `&str` keys, JSON `&[u8]` values.

use redb::TableDefinition;

/// The active `PolicyState`, under [`CURRENT_POLICY_KEY`].
pub const POLICY: TableDefinition<&str, &[u8]> = TableDefinition::new("policy");

pub const CURRENT_POLICY_KEY: &str = "current";

/// Scaling events keyed by `{resource}:{epoch_ms:020}:{seq:010}`.
pub const SCALING_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("scaling_events");
