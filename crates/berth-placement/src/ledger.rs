//! Capacity ledger. The only place host capacity is mutated.
//!
//! A reservation locks the host's CPU record and then its memory record
//! (always in that order), re-reads both under the locks, evaluates the
//! admission rule for the requested [`AllocationMode`], writes both records
//! back only if admitted, and releases the locks on every path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

use berth_core::{
    AllocationMode, CapacityRecord, HostCapacity, HostId, ReleaseMode, ResourceRequest,
    ResourceType,
};
use berth_state::{StateError, StateStore};

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The host has no (or only one) capacity record: an upstream inventory gap.
    #[error("capacity records missing for host {0}")]
    MissingCapacity(String),

    #[error("timed out waiting for capacity lock on host {0}")]
    LockTimeout(String),

    #[error("capacity store error: {0}")]
    Store(StateError),
}

impl From<StateError> for LedgerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::MissingCapacity(host_id) => LedgerError::MissingCapacity(host_id),
            StateError::LockTimeout(host_id) => LedgerError::LockTimeout(host_id),
            other => LedgerError::Store(other),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Per-host CPU and memory counters with an atomic check-and-update.
pub trait CapacityLedger: Send + Sync {
    /// Admit `req` on `host_id` and apply it to both records, or change nothing.
    fn reserve(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: AllocationMode,
    ) -> LedgerResult<bool>;

    /// Evaluate the admission rule without mutating either record.
    fn admissible(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: AllocationMode,
    ) -> LedgerResult<bool>;

    /// Hand capacity back from a stopped workload.
    fn release(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: ReleaseMode,
    ) -> LedgerResult<HostCapacity>;

    /// Unlocked snapshot of a host's records. Advisory only.
    fn capacity(&self, host_id: &str) -> LedgerResult<HostCapacity>;
}

impl CapacityLedger for StateStore {
    fn reserve(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: AllocationMode,
    ) -> LedgerResult<bool> {
        Ok(self.reserve_capacity(host_id, req, mode)?)
    }

    fn admissible(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: AllocationMode,
    ) -> LedgerResult<bool> {
        Ok(self.check_capacity(host_id, req, mode)?)
    }

    fn release(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: ReleaseMode,
    ) -> LedgerResult<HostCapacity> {
        Ok(self.release_capacity(host_id, req, mode)?)
    }

    fn capacity(&self, host_id: &str) -> LedgerResult<HostCapacity> {
        self.get_capacity(host_id)?
            .ok_or_else(|| LedgerError::MissingCapacity(host_id.to_string()))
    }
}

// ── In-memory ledger ───────────────────────────────────────────────

type RecordCell = Arc<Mutex<CapacityRecord>>;

/// Process-local ledger with one lock per (host, resource) record.
///
/// Reservations against different hosts never contend. Lock acquisition is
/// bounded by `lock_timeout`; a timeout fails that host's attempt only.
pub struct MemoryLedger {
    records: RwLock<HashMap<(HostId, ResourceType), RecordCell>>,
    lock_timeout: Duration,
}

impl MemoryLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Install (or overwrite) both records of a host.
    pub fn insert_host(&self, host_id: &str, capacity: HostCapacity) {
        for resource in ResourceType::LOCK_ORDER {
            self.insert_record(host_id, *capacity.record(resource));
        }
    }

    /// Install a single record, e.g. while a host is still being registered.
    pub fn insert_record(&self, host_id: &str, record: CapacityRecord) {
        let key = (host_id.to_string(), record.resource);
        let mut records = self.records.write();
        match records.get(&key) {
            Some(cell) => *cell.lock() = record,
            None => {
                records.insert(key, Arc::new(Mutex::new(record)));
            }
        }
    }

    /// Drop both records of a host. Returns true if any record existed.
    pub fn remove_host(&self, host_id: &str) -> bool {
        let mut records = self.records.write();
        let mut removed = false;
        for resource in ResourceType::LOCK_ORDER {
            removed |= records.remove(&(host_id.to_string(), resource)).is_some();
        }
        removed
    }

    /// Look up both record cells without locking them.
    fn cells(&self, host_id: &str) -> LedgerResult<(RecordCell, RecordCell)> {
        let records = self.records.read();
        let lookup =
            |resource: ResourceType| records.get(&(host_id.to_string(), resource)).cloned();
        match (lookup(ResourceType::Cpu), lookup(ResourceType::Memory)) {
            (Some(cpu), Some(memory)) => Ok((cpu, memory)),
            _ => Err(LedgerError::MissingCapacity(host_id.to_string())),
        }
    }

    /// Run `f` with both records locked, CPU first, writing back any change.
    pub(crate) fn with_locked<T>(
        &self,
        host_id: &str,
        f: impl FnOnce(&mut HostCapacity) -> T,
    ) -> LedgerResult<T> {
        let (cpu_cell, memory_cell) = self.cells(host_id)?;
        let timeout = || LedgerError::LockTimeout(host_id.to_string());

        let mut cpu = cpu_cell.try_lock_for(self.lock_timeout).ok_or_else(timeout)?;
        let mut memory = memory_cell
            .try_lock_for(self.lock_timeout)
            .ok_or_else(timeout)?;

        let before = HostCapacity {
            cpu: *cpu,
            memory: *memory,
        };
        let mut capacity = before;
        let out = f(&mut capacity);
        if capacity != before {
            *cpu = capacity.cpu;
            *memory = capacity.memory;
        }
        Ok(out)
    }
}

impl CapacityLedger for MemoryLedger {
    fn reserve(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: AllocationMode,
    ) -> LedgerResult<bool> {
        let admitted = self.with_locked(host_id, |capacity| capacity.allocate(req, mode))?;
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

    fn admissible(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: AllocationMode,
    ) -> LedgerResult<bool> {
        self.with_locked(host_id, |capacity| capacity.admits(req, mode))
    }

    fn release(
        &self,
        host_id: &str,
        req: &ResourceRequest,
        mode: ReleaseMode,
    ) -> LedgerResult<HostCapacity> {
        let capacity = self.with_locked(host_id, |capacity| {
            capacity.release(req, mode);
            *capacity
        })?;
        debug!(host = %host_id, cpu = req.cpu, memory = req.memory, ?mode, "capacity released");
        Ok(capacity)
    }

    fn capacity(&self, host_id: &str) -> LedgerResult<HostCapacity> {
        // Both guards held, so the pair is never torn by a concurrent reserve.
        self.with_locked(host_id, |capacity| *capacity)
    }
}
