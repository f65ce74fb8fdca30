//! StateStore: redb-backed topology and capacity persistence for Berth.
//!
//! Provides typed CRUD over zones, pods, clusters, and hosts, plus the
//! transactional capacity operations the planner relies on. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use berth_core::{
    AllocationMode, CapacityRecord, Cluster, Host, HostCapacity, HostStatus, Pod, ReleaseMode,
    ResourceRequest, ResourceType, Zone,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
///
/// Capacity writers additionally pass through `capacity_gate`, so a bounded
/// `lock_timeout` caps how long a reservation waits for its turn.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    capacity_gate: Arc<Mutex<()>>,
    lock_timeout: Option<Duration>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            capacity_gate: Arc::new(Mutex::new(())),
            lock_timeout: None,
        }
    }

    /// Bound the wait for the capacity writer. Unset waits indefinitely.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    /// Take the capacity writer slot, failing with `LockTimeout` past the bound.
    fn enter_capacity_writer(&self, host_id: &str) -> StateResult<MutexGuard<'_, ()>> {
        match self.lock_timeout {
            Some(timeout) => self
                .capacity_gate
                .try_lock_for(timeout)
                .ok_or_else(|| StateError::LockTimeout(host_id.to_string())),
            None => Ok(self.capacity_gate.lock()),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [ZONES, PODS, CLUSTERS, HOSTS, CAPACITY] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Zones ──────────────────────────────────────────────────────

    pub fn put_zone(&self, zone: &Zone) -> StateResult<()> {
        self.put_value(ZONES, &zone.id, zone)
    }

    pub fn get_zone(&self, zone_id: &str) -> StateResult<Option<Zone>> {
        self.get_value(ZONES, zone_id)
    }

    pub fn list_zones(&self) -> StateResult<Vec<Zone>> {
        self.list_values(ZONES, |_: &Zone| true)
    }

    // ── Pods ───────────────────────────────────────────────────────

    pub fn put_pod(&self, pod: &Pod) -> StateResult<()> {
        self.put_value(PODS, &pod.id, pod)
    }

    pub fn get_pod(&self, pod_id: &str) -> StateResult<Option<Pod>> {
        self.get_value(PODS, pod_id)
    }

    /// List all pods belonging to a zone.
    pub fn list_pods_in_zone(&self, zone_id: &str) -> StateResult<Vec<Pod>> {
        self.list_values(PODS, |pod: &Pod| pod.zone_id == zone_id)
    }

    // ── Clusters ───────────────────────────────────────────────────

    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.put_value(CLUSTERS, &cluster.id, cluster)
    }

    pub fn get_cluster(&self, cluster_id: &str) -> StateResult<Option<Cluster>> {
        self.get_value(CLUSTERS, cluster_id)
    }

    /// List all clusters belonging to a pod.
    pub fn list_clusters_in_pod(&self, pod_id: &str) -> StateResult<Vec<Cluster>> {
        self.list_values(CLUSTERS, |cluster: &Cluster| cluster.pod_id == pod_id)
    }

    // ── Hosts ──────────────────────────────────────────────────────

    pub fn put_host(&self, host: &Host) -> StateResult<()> {
        self.put_value(HOSTS, &host.id, host)
    }

    pub fn get_host(&self, host_id: &str) -> StateResult<Option<Host>> {
        self.get_value(HOSTS, host_id)
    }

    /// List all hosts belonging to a cluster.
    pub fn list_hosts_in_cluster(&self, cluster_id: &str) -> StateResult<Vec<Host>> {
        self.list_values(HOSTS, |host: &Host| host.cluster_id == cluster_id)
    }

    /// Record a new liveness status for a host.
    pub fn set_host_status(&self, host_id: &str, status: HostStatus) -> StateResult<()> {
        let mut host = self
            .get_host(host_id)?
            .ok_or_else(|| StateError::NotFound(format!("host {host_id}")))?;
        host.status = status;
        self.put_host(&host)?;
        debug!(host = %host_id, %status, "host status updated");
        Ok(())
    }

    /// Delete a host and its capacity records. Returns true if the host existed.
    pub fn delete_host(&self, host_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            existed = hosts.remove(host_id).map_err(map_err!(Write))?.is_some();
            let mut capacity = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            for resource in ResourceType::LOCK_ORDER {
                let key = capacity_key(host_id, resource);
                capacity.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %host_id, existed, "host deleted");
        Ok(existed)
    }

    // ── Capacity ───────────────────────────────────────────────────

    /// Insert or overwrite both capacity records of a host.
    pub fn put_capacity(&self, host_id: &str, capacity: &HostCapacity) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            write_pair(&mut table, host_id, capacity)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            host = %host_id,
            cpu_total = capacity.cpu.total,
            memory_total = capacity.memory.total,
            "capacity stored"
        );
        Ok(())
    }

    /// Read both capacity records of a host.
    ///
    /// Returns `None` unless both the CPU and memory record exist.
    pub fn get_capacity(&self, host_id: &str) -> StateResult<Option<HostCapacity>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
        read_pair(&table, host_id)
    }

    /// Atomically admit `req` against a host's capacity and apply it.
    ///
    /// Both records are read and rewritten inside one write transaction, so
    /// the admission math always sees committed values and no concurrent
    /// writer can interleave. The transaction is committed whether or not
    /// the request is admitted; on rejection nothing is written.
    pub fn reserve_capacity(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: AllocationMode,
    ) -> StateResult<bool> {
        let _writer = self.enter_capacity_writer(host_id)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let admitted = {
            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            match read_pair(&table, host_id)? {
                Some(mut capacity) => {
                    let admitted = capacity.allocate(req, mode);
                    if admitted {
                        write_pair(&mut table, host_id, &capacity)?;
                    }
                    Some(admitted)
                }
                None => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;

        let admitted = admitted.ok_or_else(|| StateError::MissingCapacity(host_id.to_string()))?;
        debug!(
            host = %host_id,
            cpu = req.cpu,
            memory = req.memory,
            ?mode,
            admitted,
            "capacity reservation evaluated"
        );
        Ok(admitted)
    }

    /// Evaluate the admission test for `req` without writing anything.
    pub fn check_capacity(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: AllocationMode,
    ) -> StateResult<bool> {
        let capacity = self
            .get_capacity(host_id)?
            .ok_or_else(|| StateError::MissingCapacity(host_id.to_string()))?;
        Ok(capacity.admits(req, mode))
    }

    /// Return capacity previously taken by a workload on this host.
    pub fn release_capacity(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: ReleaseMode,
    ) -> StateResult<HostCapacity> {
        let _writer = self.enter_capacity_writer(host_id)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let capacity = {
            let mut table = txn.open_table(CAPACITY).map_err(map_err!(Table))?;
            let mut capacity = read_pair(&table, host_id)?
                .ok_or_else(|| StateError::MissingCapacity(host_id.to_string()))?;
            capacity.release(req, mode);
            write_pair(&mut table, host_id, &capacity)?;
            capacity
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %host_id, cpu = req.cpu, memory = req.memory, ?mode, "capacity released");
        Ok(capacity)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn put_value<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_values<T, F>(&self, table: JsonTable, keep: F) -> StateResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = decode(value.value())?;
            if keep(&item) {
                results.push(item);
            }
        }
        Ok(results)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn read_record<T>(
    table: &T,
    host_id: &str,
    resource: ResourceType,
) -> StateResult<Option<CapacityRecord>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let key = capacity_key(host_id, resource);
    match table.get(key.as_str()).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Read a host's CPU and memory records, CPU first.
fn read_pair<T>(table: &T, host_id: &str) -> StateResult<Option<HostCapacity>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let cpu = read_record(table, host_id, ResourceType::Cpu)?;
    let memory = read_record(table, host_id, ResourceType::Memory)?;
    Ok(match (cpu, memory) {
        (Some(cpu), Some(memory)) => Some(HostCapacity { cpu, memory }),
        _ => None,
    })
}

fn write_pair(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    host_id: &str,
    capacity: &HostCapacity,
) -> StateResult<()> {
    for resource in ResourceType::LOCK_ORDER {
        let key = capacity_key(host_id, resource);
        let bytes = serde_json::to_vec(capacity.record(resource)).map_err(map_err!(Serialize))?;
        table
            .insert(key.as_str(), bytes.as_slice())
            .map_err(map_err!(Write))?;
    }
    Ok(())
}
