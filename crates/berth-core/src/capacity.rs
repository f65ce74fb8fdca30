//! Capacity records and the admission rules applied to them.
//!
//! Every host owns two [`CapacityRecord`]s, one per [`ResourceType`]. They
//! are stored and locked independently but always admitted and updated as
//! a pair through [`HostCapacity`], so a workload is never half placed.
//!
//! Invariant after every successful update: `used + reserved <= total`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ResourceRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Cpu,
    Memory,
}

impl ResourceType {
    /// Fixed lock order: CPU is always acquired before memory.
    pub const LOCK_ORDER: [ResourceType; 2] = [ResourceType::Cpu, ResourceType::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Cpu => "cpu",
            ResourceType::Memory => "memory",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an allocation draws its capacity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Consume capacity already set aside for this workload.
    FromReserved,
    /// Consume unreserved, unused capacity.
    FromFree,
}

/// What happens to capacity handed back by a stopped workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseMode {
    /// Return the amount to the free pool.
    Free,
    /// Move the amount from used to reserved, holding it for the workload's return.
    ///
    /// A later [`AllocationMode::FromReserved`] placement only drains
    /// `reserved`; it does not add back to `used`. Once the workload is
    /// running again its footprint is absent from the record, and that
    /// capacity is admissible to `FromFree` placements. Callers that need
    /// the returning workload accounted must track it outside the ledger.
    Reserve,
}

/// Counters for one resource on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRecord {
    pub resource: ResourceType,
    pub total: u64,
    pub used: u64,
    pub reserved: u64,
}

impl CapacityRecord {
    pub fn new(resource: ResourceType, total: u64) -> Self {
        Self {
            resource,
            total,
            used: 0,
            reserved: 0,
        }
    }

    /// Capacity neither used nor reserved.
    pub fn free(&self) -> u64 {
        self.total
            .saturating_sub(self.used)
            .saturating_sub(self.reserved)
    }

    pub fn is_consistent(&self) -> bool {
        self.used
            .checked_add(self.reserved)
            .is_some_and(|committed| committed <= self.total)
    }

    fn fits_free(&self, amount: u64) -> bool {
        self.reserved
            .checked_add(self.used)
            .and_then(|v| v.checked_add(amount))
            .is_some_and(|v| v <= self.total)
    }

    fn fits_reserved(&self, amount: u64) -> bool {
        self.reserved >= amount
    }
}

/// The CPU and memory records of a single host, admitted as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapacity {
    pub cpu: CapacityRecord,
    pub memory: CapacityRecord,
}

impl HostCapacity {
    pub fn new(total_cpu: u64, total_memory: u64) -> Self {
        Self {
            cpu: CapacityRecord::new(ResourceType::Cpu, total_cpu),
            memory: CapacityRecord::new(ResourceType::Memory, total_memory),
        }
    }

    /// Whether both resources admit `req` under `mode`.
    pub fn admits(&self, req: &ResourceRequest, mode: AllocationMode) -> bool {
        match mode {
            AllocationMode::FromReserved => {
                self.cpu.fits_reserved(req.cpu) && self.memory.fits_reserved(req.memory)
            }
            AllocationMode::FromFree => {
                self.cpu.fits_free(req.cpu) && self.memory.fits_free(req.memory)
            }
        }
    }

    /// Admit and apply `req` to both records, or leave both untouched.
    pub fn allocate(&mut self, req: &ResourceRequest, mode: AllocationMode) -> bool {
        if !self.admits(req, mode) {
            return false;
        }
        match mode {
            AllocationMode::FromReserved => {
                self.cpu.reserved -= req.cpu;
                self.memory.reserved -= req.memory;
            }
            AllocationMode::FromFree => {
                self.cpu.used += req.cpu;
                self.memory.used += req.memory;
            }
        }
        true
    }

    /// Hand capacity back. Amounts larger than `used` are clamped.
    pub fn release(&mut self, req: &ResourceRequest, mode: ReleaseMode) {
        for (record, amount) in [(&mut self.cpu, req.cpu), (&mut self.memory, req.memory)] {
            let returned = amount.min(record.used);
            record.used -= returned;
            if mode == ReleaseMode::Reserve {
                record.reserved += returned;
            }
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.cpu.is_consistent() && self.memory.is_consistent()
    }

    pub fn record(&self, resource: ResourceType) -> &CapacityRecord {
        match resource {
            ResourceType::Cpu => &self.cpu,
            ResourceType::Memory => &self.memory,
        }
    }
}
