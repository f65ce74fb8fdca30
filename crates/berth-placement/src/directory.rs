//! Read-only topology queries consumed by the planners.
//!
//! Bridges `berth_state::StateStore` to the placement engine. Any other
//! inventory source can back a planner by implementing [`TopologyDirectory`].

use thiserror::Error;

use berth_core::{Cluster, Host, Pod, Zone};
use berth_state::{StateError, StateStore};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("topology lookup failed: {0}")]
    Lookup(String),

    #[error("topology store error: {0}")]
    State(#[from] StateError),
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Snapshot queries over the zone → pod → cluster → host tree.
pub trait TopologyDirectory: Send + Sync {
    fn zone(&self, zone_id: &str) -> DirectoryResult<Option<Zone>>;
    fn pod(&self, pod_id: &str) -> DirectoryResult<Option<Pod>>;
    fn cluster(&self, cluster_id: &str) -> DirectoryResult<Option<Cluster>>;
    fn host(&self, host_id: &str) -> DirectoryResult<Option<Host>>;

    fn pods_in_zone(&self, zone_id: &str) -> DirectoryResult<Vec<Pod>>;
    fn clusters_in_pod(&self, pod_id: &str) -> DirectoryResult<Vec<Cluster>>;
    fn hosts_in_cluster(&self, cluster_id: &str) -> DirectoryResult<Vec<Host>>;
}

impl TopologyDirectory for StateStore {
    fn zone(&self, zone_id: &str) -> DirectoryResult<Option<Zone>> {
        Ok(self.get_zone(zone_id)?)
    }

    fn pod(&self, pod_id: &str) -> DirectoryResult<Option<Pod>> {
        Ok(self.get_pod(pod_id)?)
    }

    fn cluster(&self, cluster_id: &str) -> DirectoryResult<Option<Cluster>> {
        Ok(self.get_cluster(cluster_id)?)
    }

    fn host(&self, host_id: &str) -> DirectoryResult<Option<Host>> {
        Ok(self.get_host(host_id)?)
    }

    fn pods_in_zone(&self, zone_id: &str) -> DirectoryResult<Vec<Pod>> {
        Ok(self.list_pods_in_zone(zone_id)?)
    }

    fn clusters_in_pod(&self, pod_id: &str) -> DirectoryResult<Vec<Cluster>> {
        Ok(self.list_clusters_in_pod(pod_id)?)
    }

    fn hosts_in_cluster(&self, cluster_id: &str) -> DirectoryResult<Vec<Host>> {
        Ok(self.list_hosts_in_cluster(cluster_id)?)
    }
}
