//! Shared fixtures for planner tests.

use berth_core::{Cluster, Host, HostCapacity, HostStatus, Pod, ReleaseMode, ResourceRequest, Zone};
use berth_state::StateStore;

pub const ZONE: &str = "zone-1";

/// One host row of a fixture topology.
pub struct HostSpec {
    pub pod: &'static str,
    pub cluster: &'static str,
    pub host: &'static str,
    pub status: HostStatus,
    pub cpu: u64,
    pub memory: u64,
}

pub fn up(
    pod: &'static str,
    cluster: &'static str,
    host: &'static str,
    cpu: u64,
    memory: u64,
) -> HostSpec {
    HostSpec {
        pod,
        cluster,
        host,
        status: HostStatus::Up,
        cpu,
        memory,
    }
}

pub fn down(
    pod: &'static str,
    cluster: &'static str,
    host: &'static str,
    cpu: u64,
    memory: u64,
) -> HostSpec {
    HostSpec {
        status: HostStatus::Down,
        ..up(pod, cluster, host, cpu, memory)
    }
}

pub fn host(id: &str, cluster_id: &str, status: HostStatus) -> Host {
    Host {
        id: id.to_string(),
        cluster_id: cluster_id.to_string(),
        name: id.to_string(),
        status,
    }
}

/// In-memory store holding `ZONE` and the given hosts, all capacity free.
pub fn seed_store(hosts: &[HostSpec]) -> StateStore {
    let store = StateStore::open_in_memory().unwrap();
    store
        .put_zone(&Zone {
            id: ZONE.to_string(),
            name: ZONE.to_string(),
        })
        .unwrap();
    for spec in hosts {
        store
            .put_pod(&Pod {
                id: spec.pod.to_string(),
                zone_id: ZONE.to_string(),
                name: spec.pod.to_string(),
            })
            .unwrap();
        store
            .put_cluster(&Cluster {
                id: spec.cluster.to_string(),
                pod_id: spec.pod.to_string(),
                name: spec.cluster.to_string(),
            })
            .unwrap();
        store.put_host(&host(spec.host, spec.cluster, spec.status)).unwrap();
        store
            .put_capacity(spec.host, &HostCapacity::new(spec.cpu, spec.memory))
            .unwrap();
    }
    store
}

/// Simulate a stopped workload whose capacity stays held for its return.
pub fn reserve_for_return(store: &StateStore, host_id: &str, cpu: u64, memory: u64) {
    let mut capacity = store.get_capacity(host_id).unwrap().unwrap();
    let req = ResourceRequest::new(cpu, memory);
    assert!(capacity.allocate(&req, berth_core::AllocationMode::FromFree));
    capacity.release(&req, ReleaseMode::Reserve);
    store.put_capacity(host_id, &capacity).unwrap();
}
