//! Berth placement: choose a host for a VM and reserve its capacity.
//!
//! The planners walk the zone → pod → cluster → host topology exposed by a
//! [`TopologyDirectory`] and admit the workload through a
//! [`CapacityLedger`], whose locked check-and-update guarantees that
//! concurrent placements never overcommit a host.
//!
//! # Components
//!
//! - **`directory`**: read-only topology queries (implemented for `StateStore`)
//! - **`ledger`**: capacity reservation seam, plus the in-memory `MemoryLedger`
//! - **`planner`**: `Planner` trait, first-fit search, strategy resolver
//! - **`best_fit`**: tightest-host variant of the search
//! - **`error`**: placement error types

pub mod best_fit;
pub mod directory;
pub mod error;
pub mod ledger;
pub mod planner;

pub use best_fit::BestFitPlanner;
pub use directory::{DirectoryError, DirectoryResult, TopologyDirectory};
pub use error::{PlacementError, PlacementResult};
pub use ledger::{CapacityLedger, LedgerError, LedgerResult, MemoryLedger};
pub use planner::{
    Candidate, FirstFitPlanner, PlacementContext, Planner, SearchStats, build_planner,
};

#[cfg(test)]
pub(crate) mod testing;
