//! redb table definitions for the Berth state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use berth_core::ResourceType;
use redb::TableDefinition;

/// Zones keyed by `{zone_id}`.
pub const ZONES: TableDefinition<&str, &[u8]> = TableDefinition::new("zones");

/// Pods keyed by `{pod_id}`.
pub const PODS: TableDefinition<&str, &[u8]> = TableDefinition::new("pods");

/// Clusters keyed by `{cluster_id}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Hosts keyed by `{host_id}`.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Capacity records keyed by `{host_id}:{resource}`.
pub const CAPACITY: TableDefinition<&str, &[u8]> = TableDefinition::new("capacity");

/// Build the composite key for the capacity table.
pub fn capacity_key(host_id: &str, resource: ResourceType) -> String {
    format!("{host_id}:{resource}")
}
