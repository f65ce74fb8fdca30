//! TOML topology seed files.
//!
//! ```toml
//! [[zones]]
//! id = "zone-1"
//!
//! [[zones.pods]]
//! id = "pod-a"
//!
//! [[zones.pods.clusters]]
//! id = "cluster-a1"
//!
//! [[zones.pods.clusters.hosts]]
//! id = "host-1"
//! status = "up"
//! cpu = 32000
//! memory = 65536
//! ```

use std::path::Path;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::info;

use berth_core::{Cluster, Host, HostCapacity, HostStatus, Pod, Zone};
use berth_state::StateStore;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyFile {
    #[serde(default)]
    pub zones: Vec<ZoneSeed>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneSeed {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub pods: Vec<PodSeed>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodSeed {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub clusters: Vec<ClusterSeed>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSeed {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub hosts: Vec<HostSeed>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSeed {
    pub id: String,
    pub name: Option<String>,
    #[serde(default = "default_status")]
    pub status: HostStatus,
    /// Total CPU in MHz.
    pub cpu: u64,
    /// Total memory in MB.
    pub memory: u64,
    #[serde(default)]
    pub cpu_used: u64,
    #[serde(default)]
    pub cpu_reserved: u64,
    #[serde(default)]
    pub memory_used: u64,
    #[serde(default)]
    pub memory_reserved: u64,
}

fn default_status() -> HostStatus {
    HostStatus::Up
}

impl HostSeed {
    fn capacity(&self) -> HostCapacity {
        let mut capacity = HostCapacity::new(self.cpu, self.memory);
        capacity.cpu.used = self.cpu_used;
        capacity.cpu.reserved = self.cpu_reserved;
        capacity.memory.used = self.memory_used;
        capacity.memory.reserved = self.memory_reserved;
        capacity
    }
}

/// Counts of what a seed run wrote.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub zones: usize,
    pub pods: usize,
    pub clusters: usize,
    pub hosts: usize,
}

impl TopologyFile {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read topology {}", path.display()))?;
        content.parse()
    }

    /// Reject capacity that already breaks `used + reserved <= total`.
    pub fn validate(&self) -> anyhow::Result<()> {
        for host in self.hosts() {
            if !host.capacity().is_consistent() {
                bail!(
                    "host {}: used + reserved exceeds total for cpu or memory",
                    host.id
                );
            }
        }
        Ok(())
    }

    fn hosts(&self) -> impl Iterator<Item = &HostSeed> {
        self.zones
            .iter()
            .flat_map(|z| &z.pods)
            .flat_map(|p| &p.clusters)
            .flat_map(|c| &c.hosts)
    }

    /// Write every level of the topology, with host capacity, into `store`.
    ///
    /// Existing rows with the same ids are overwritten.
    pub fn apply(&self, store: &StateStore) -> anyhow::Result<SeedSummary> {
        self.validate()?;
        let mut summary = SeedSummary::default();

        for zone in &self.zones {
            store.put_zone(&Zone {
                id: zone.id.clone(),
                name: display_name(&zone.name, &zone.id),
            })?;
            summary.zones += 1;

            for pod in &zone.pods {
                store.put_pod(&Pod {
                    id: pod.id.clone(),
                    zone_id: zone.id.clone(),
                    name: display_name(&pod.name, &pod.id),
                })?;
                summary.pods += 1;

                for cluster in &pod.clusters {
                    store.put_cluster(&Cluster {
                        id: cluster.id.clone(),
                        pod_id: pod.id.clone(),
                        name: display_name(&cluster.name, &cluster.id),
                    })?;
                    summary.clusters += 1;

                    for host in &cluster.hosts {
                        store.put_host(&Host {
                            id: host.id.clone(),
                            cluster_id: cluster.id.clone(),
                            name: display_name(&host.name, &host.id),
                            status: host.status,
                        })?;
                        store.put_capacity(&host.id, &host.capacity())?;
                        summary.hosts += 1;
                    }
                }
            }
        }

        info!(
            zones = summary.zones,
            pods = summary.pods,
            clusters = summary.clusters,
            hosts = summary.hosts,
            "topology seeded"
        );
        Ok(summary)
    }
}

impl std::str::FromStr for TopologyFile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let file: TopologyFile = toml::from_str(s).context("invalid topology file")?;
        file.validate()?;
        Ok(file)
    }
}

fn display_name(name: &Option<String>, id: &str) -> String {
    name.clone().unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[zones]]
id = "zone-1"
name = "Primary"

[[zones.pods]]
id = "pod-a"

[[zones.pods.clusters]]
id = "cluster-a1"

[[zones.pods.clusters.hosts]]
id = "host-1"
cpu = 32000
memory = 65536

[[zones.pods.clusters.hosts]]
id = "host-2"
status = "maintenance"
cpu = 16000
memory = 32768
cpu_used = 4000
cpu_reserved = 2000
memory_used = 8192
"#;

    #[test]
    fn parses_nested_topology() {
        let file: TopologyFile = SAMPLE.parse().unwrap();
        assert_eq!(file.zones.len(), 1);
        let hosts: Vec<_> = file.hosts().collect();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].status, HostStatus::Up);
        assert_eq!(hosts[1].status, HostStatus::Maintenance);
        assert_eq!(hosts[1].capacity().cpu.free(), 10000);
    }

    #[test]
    fn apply_writes_every_level() {
        let store = StateStore::open_in_memory().unwrap();
        let file: TopologyFile = SAMPLE.parse().unwrap();

        let summary = file.apply(&store).unwrap();

        assert_eq!(
            summary,
            SeedSummary {
                zones: 1,
                pods: 1,
                clusters: 1,
                hosts: 2
            }
        );
        assert_eq!(store.get_zone("zone-1").unwrap().unwrap().name, "Primary");
        assert_eq!(store.get_pod("pod-a").unwrap().unwrap().name, "pod-a");
        assert_eq!(store.list_hosts_in_cluster("cluster-a1").unwrap().len(), 2);
        let capacity = store.get_capacity("host-2").unwrap().unwrap();
        assert_eq!(capacity.cpu.used, 4000);
        assert_eq!(capacity.cpu.reserved, 2000);
        assert_eq!(capacity.memory.used, 8192);
        assert_eq!(capacity.memory.reserved, 0);
    }

    #[test]
    fn rejects_overcommitted_host() {
        let bad = r#"
[[zones]]
id = "z"
[[zones.pods]]
id = "p"
[[zones.pods.clusters]]
id = "c"
[[zones.pods.clusters.hosts]]
id = "h"
cpu = 10
memory = 10
cpu_used = 8
cpu_reserved = 4
"#;
        let err = bad.parse::<TopologyFile>().unwrap_err();
        assert!(err.to_string().contains("host h"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let bad = r#"
[[zones]]
id = "z"
region = "eu"
"#;
        assert!(bad.parse::<TopologyFile>().is_err());
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let file = TopologyFile::from_file(&path).unwrap();
        assert_eq!(file.hosts().count(), 2);

        let missing = TopologyFile::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(missing.to_string().contains("absent.toml"));
    }
}
