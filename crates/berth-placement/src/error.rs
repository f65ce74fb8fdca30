//! Placement error types.

use thiserror::Error;

use crate::directory::DirectoryError;

/// Errors surfaced to callers of a planner.
///
/// Per-host failures during the search (rejections, lock timeouts, missing
/// capacity records) are absorbed by the planner and never appear here.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("insufficient capacity in zone {zone_id} for cpu={cpu} memory={memory}")]
    NoCapacity { zone_id: String, cpu: u64, memory: u64 },

    #[error("invalid workload request: {0}")]
    InvalidRequest(String),

    #[error("zone not found: {0}")]
    UnknownZone(String),

    #[error(transparent)]
    Topology(#[from] DirectoryError),
}

impl PlacementError {
    /// Whether a caller may retry with relaxed constraints.
    pub fn is_capacity_exhausted(&self) -> bool {
        matches!(self, PlacementError::NoCapacity { .. })
    }
}

pub type PlacementResult<T> = Result<T, PlacementError>;
