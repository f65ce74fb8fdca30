//! Subcommand handlers. Each one works against an open store and returns
//! a JSON value for `main` to print.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{Value, json};
use tracing::info;

use berth_core::{
    BerthConfig, ExcludeList, ReleaseMode, ResourceRequest, ServiceOffering, WorkloadRequest,
};
use berth_placement::{CapacityLedger, build_planner};
use berth_state::StateStore;

use crate::topology::TopologyFile;

/// Inputs of one `plan` invocation.
#[derive(Debug, Clone, Default)]
pub struct PlanArgs {
    pub zone: String,
    pub cores: u32,
    pub speed_mhz: u32,
    pub memory_mb: u64,
    pub last_host: Option<String>,
    pub avoid_hosts: Vec<String>,
    pub avoid_clusters: Vec<String>,
    pub avoid_pods: Vec<String>,
}

impl PlanArgs {
    fn workload(&self) -> WorkloadRequest {
        let offering = ServiceOffering {
            cpu_cores: self.cores,
            cpu_speed_mhz: self.speed_mhz,
            memory_mb: self.memory_mb,
        };
        WorkloadRequest::from_offering(&offering, self.zone.clone(), self.last_host.clone())
    }

    fn exclude(&self) -> ExcludeList {
        let mut exclude = ExcludeList::new();
        for id in &self.avoid_hosts {
            exclude.add_host(id.clone());
        }
        for id in &self.avoid_clusters {
            exclude.add_cluster(id.clone());
        }
        for id in &self.avoid_pods {
            exclude.add_pod(id.clone());
        }
        exclude
    }
}

pub fn seed(store: &StateStore, topology: &TopologyFile) -> anyhow::Result<Value> {
    let summary = topology.apply(store)?;
    Ok(json!({
        "zones": summary.zones,
        "pods": summary.pods,
        "clusters": summary.clusters,
        "hosts": summary.hosts,
    }))
}

pub fn plan(store: &StateStore, config: &BerthConfig, args: &PlanArgs) -> anyhow::Result<Value> {
    let planner = build_planner(
        &config.planner,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    info!(strategy = planner.kind().as_str(), zone = %args.zone, "planning workload");

    let decision = planner.plan(&args.workload(), &args.exclude())?;
    Ok(serde_json::to_value(&decision)?)
}

pub fn capacity(store: &StateStore, host_id: &str) -> anyhow::Result<Value> {
    let capacity = CapacityLedger::capacity(store, host_id)
        .with_context(|| format!("no capacity for host {host_id}"))?;
    Ok(serde_json::to_value(capacity)?)
}

pub fn release(
    store: &StateStore,
    host_id: &str,
    req: ResourceRequest,
    reserve: bool,
) -> anyhow::Result<Value> {
    let mode = if reserve {
        ReleaseMode::Reserve
    } else {
        ReleaseMode::Free
    };
    let capacity = CapacityLedger::release(store, host_id, &req, mode)
        .with_context(|| format!("failed to release capacity on host {host_id}"))?;
    info!(host = %host_id, cpu = req.cpu, memory = req.memory, ?mode, "capacity released");
    Ok(serde_json::to_value(capacity)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = r#"
[[zones]]
id = "zone-1"

[[zones.pods]]
id = "pod-a"

[[zones.pods.clusters]]
id = "cluster-a1"

[[zones.pods.clusters.hosts]]
id = "host-1"
cpu = 8000
memory = 8192

[[zones.pods.clusters.hosts]]
id = "host-2"
status = "down"
cpu = 64000
memory = 65536
"#;

    fn seeded() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, &TOPOLOGY.parse().unwrap()).unwrap();
        store
    }

    fn plan_args(cores: u32, speed_mhz: u32, memory_mb: u64) -> PlanArgs {
        PlanArgs {
            zone: "zone-1".to_string(),
            cores,
            speed_mhz,
            memory_mb,
            ..PlanArgs::default()
        }
    }

    #[test]
    fn plan_prints_decision_and_reserves() {
        let store = seeded();

        let out = plan(&store, &BerthConfig::default(), &plan_args(2, 2000, 2048)).unwrap();

        assert_eq!(out["host_id"], "host-1");
        assert_eq!(out["cluster_id"], "cluster-a1");
        assert_eq!(out["mode"], "from_free");
        let capacity = capacity(&store, "host-1").unwrap();
        assert_eq!(capacity["cpu"]["used"], 4000);
        assert_eq!(capacity["memory"]["used"], 2048);
    }

    #[test]
    fn plan_reports_exhaustion() {
        let store = seeded();

        let err = plan(&store, &BerthConfig::default(), &plan_args(4, 3000, 1024)).unwrap_err();
        assert!(err.to_string().contains("insufficient capacity"));
    }

    #[test]
    fn plan_honors_avoid_lists() {
        let store = seeded();
        let mut args = plan_args(1, 1000, 1024);
        args.avoid_hosts.push("host-1".to_string());

        assert!(plan(&store, &BerthConfig::default(), &args).is_err());
    }

    #[test]
    fn release_to_reserve_enables_sticky_return() {
        let store = seeded();
        plan(&store, &BerthConfig::default(), &plan_args(2, 2000, 2048)).unwrap();

        let after = release(&store, "host-1", ResourceRequest::new(4000, 2048), true).unwrap();
        assert_eq!(after["cpu"]["used"], 0);
        assert_eq!(after["cpu"]["reserved"], 4000);

        let mut args = plan_args(2, 2000, 2048);
        args.last_host = Some("host-1".to_string());
        let out = plan(&store, &BerthConfig::default(), &args).unwrap();
        assert_eq!(out["mode"], "from_reserved");
    }

    #[test]
    fn capacity_of_unknown_host_fails() {
        let store = seeded();
        let err = capacity(&store, "ghost").unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
