//! Shared types used across Berth crates.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capacity::AllocationMode;

pub type ZoneId = String;
pub type PodId = String;
pub type ClusterId = String;
pub type HostId = String;

// ── Topology ──────────────────────────────────────────────────────

/// Availability zone, the root of the placement hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pod {
    pub id: PodId,
    pub zone_id: ZoneId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cluster {
    pub id: ClusterId,
    pub pod_id: PodId,
    pub name: String,
}

/// A physical hypervisor host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    pub id: HostId,
    pub cluster_id: ClusterId,
    pub name: String,
    pub status: HostStatus,
}

impl Host {
    /// Only hosts that are up may receive new workloads.
    pub fn is_schedulable(&self) -> bool {
        self.status == HostStatus::Up
    }
}

/// Liveness of a host as last reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Up,
    #[default]
    Down,
    Disconnected,
    Maintenance,
    Alert,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HostStatus::Up => "up",
            HostStatus::Down => "down",
            HostStatus::Disconnected => "disconnected",
            HostStatus::Maintenance => "maintenance",
            HostStatus::Alert => "alert",
        };
        f.write_str(label)
    }
}

// ── Workload ──────────────────────────────────────────────────────

/// Compute offering a VM is sized by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceOffering {
    pub cpu_cores: u32,
    /// Per-core clock speed in MHz.
    pub cpu_speed_mhz: u32,
    pub memory_mb: u64,
}

impl ServiceOffering {
    /// Requested CPU as a single scalar: cores × speed.
    pub fn requested_cpu(&self) -> u64 {
        u64::from(self.cpu_cores) * u64::from(self.cpu_speed_mhz)
    }
}

/// CPU and memory amounts taken from or returned to a host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRequest {
    /// CPU in MHz.
    pub cpu: u64,
    /// Memory in MB.
    pub memory: u64,
}

impl ResourceRequest {
    pub fn new(cpu: u64, memory: u64) -> Self {
        Self { cpu, memory }
    }

    pub fn is_empty(&self) -> bool {
        self.cpu == 0 || self.memory == 0
    }
}

/// A single VM placement request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadRequest {
    pub cpu: u64,
    pub memory: u64,
    /// Host the workload last ran on, if any.
    pub last_host_id: Option<HostId>,
    pub zone_id: ZoneId,
}

impl WorkloadRequest {
    pub fn new(zone_id: impl Into<ZoneId>, cpu: u64, memory: u64) -> Self {
        Self {
            cpu,
            memory,
            last_host_id: None,
            zone_id: zone_id.into(),
        }
    }

    /// Size a request from a service offering.
    pub fn from_offering(
        offering: &ServiceOffering,
        zone_id: impl Into<ZoneId>,
        last_host_id: Option<HostId>,
    ) -> Self {
        Self {
            cpu: offering.requested_cpu(),
            memory: offering.memory_mb,
            last_host_id,
            zone_id: zone_id.into(),
        }
    }

    pub fn with_last_host(mut self, host_id: impl Into<HostId>) -> Self {
        self.last_host_id = Some(host_id.into());
        self
    }

    pub fn resources(&self) -> ResourceRequest {
        ResourceRequest::new(self.cpu, self.memory)
    }
}

/// Topology ids the caller already knows are ineligible for this call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExcludeList {
    pub zones: HashSet<ZoneId>,
    pub pods: HashSet<PodId>,
    pub clusters: HashSet<ClusterId>,
    pub hosts: HashSet<HostId>,
}

impl ExcludeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_zone(&mut self, id: impl Into<ZoneId>) -> &mut Self {
        self.zones.insert(id.into());
        self
    }

    pub fn add_pod(&mut self, id: impl Into<PodId>) -> &mut Self {
        self.pods.insert(id.into());
        self
    }

    pub fn add_cluster(&mut self, id: impl Into<ClusterId>) -> &mut Self {
        self.clusters.insert(id.into());
        self
    }

    pub fn add_host(&mut self, id: impl Into<HostId>) -> &mut Self {
        self.hosts.insert(id.into());
        self
    }

    pub fn excludes_zone(&self, id: &str) -> bool {
        self.zones.contains(id)
    }

    pub fn excludes_pod(&self, id: &str) -> bool {
        self.pods.contains(id)
    }

    pub fn excludes_cluster(&self, id: &str) -> bool {
        self.clusters.contains(id)
    }

    pub fn excludes_host(&self, id: &str) -> bool {
        self.hosts.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
            && self.pods.is_empty()
            && self.clusters.is_empty()
            && self.hosts.is_empty()
    }
}

/// Where a workload was placed and how its capacity was taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacementDecision {
    pub zone_id: ZoneId,
    pub pod_id: PodId,
    pub cluster_id: ClusterId,
    pub host_id: HostId,
    pub mode: AllocationMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offering_cpu_is_cores_times_speed() {
        let offering = ServiceOffering {
            cpu_cores: 4,
            cpu_speed_mhz: 2000,
            memory_mb: 8192,
        };
        let req = WorkloadRequest::from_offering(&offering, "zone-1", Some("h1".to_string()));
        assert_eq!(req.cpu, 8000);
        assert_eq!(req.memory, 8192);
        assert_eq!(req.last_host_id.as_deref(), Some("h1"));
        assert_eq!(req.zone_id, "zone-1");
    }

    #[test]
    fn exclude_list_tracks_each_level() {
        let mut avoid = ExcludeList::new();
        assert!(avoid.is_empty());
        avoid.add_pod("p1").add_host("h9");

        assert!(avoid.excludes_pod("p1"));
        assert!(avoid.excludes_host("h9"));
        assert!(!avoid.excludes_cluster("p1"));
        assert!(!avoid.excludes_zone("z1"));
        assert!(!avoid.is_empty());
    }

    #[test]
    fn host_status_round_trips_as_snake_case() {
        let json = serde_json::to_string(&HostStatus::Disconnected).unwrap();
        assert_eq!(json, "\"disconnected\"");
        let back: HostStatus = serde_json::from_str("\"up\"").unwrap();
        assert_eq!(back, HostStatus::Up);
    }

    #[test]
    fn only_up_hosts_are_schedulable() {
        let mut host = Host {
            id: "h1".to_string(),
            cluster_id: "c1".to_string(),
            name: "h1".to_string(),
            status: HostStatus::Up,
        };
        assert!(host.is_schedulable());
        host.status = HostStatus::Maintenance;
        assert!(!host.is_schedulable());
    }
}
