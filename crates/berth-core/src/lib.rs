pub mod capacity;
pub mod config;
pub mod types;

pub use capacity::{AllocationMode, CapacityRecord, HostCapacity, ReleaseMode, ResourceType};
pub use config::{BerthConfig, ConfigError, PlannerConfig, PlannerKind, StoreConfig};
pub use types::*;
