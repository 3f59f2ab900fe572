//! redb table definitions for the RunnerGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Worker records use composite `{fleet_id}:{worker_id}` keys.

use redb::TableDefinition;

/// Fleet specs keyed by `{fleet_id}`.
pub const FLEETS: TableDefinition<&str, &[u8]> = TableDefinition::new("fleets");

/// Worker records keyed by `{fleet_id}:{worker_id}`.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Last scaling decision keyed by `{fleet_id}`.
pub const DECISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("decisions");

/// Fleet status snapshots keyed by `{fleet_id}`.
pub const FLEET_STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("fleet_status");
