//! berth-state: embedded topology and capacity store for Berth.
//!
//! Backed by [redb](https://docs.rs/redb), holds the zone → pod → cluster →
//! host inventory and the per-host capacity records the planner reserves
//! against.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Capacity records use the composite key `{host_id}:{resource}` so the CPU
//! and memory rows of a host are independent records.
//!
//! Capacity reservation runs inside a single redb write transaction. redb
//! admits one writer at a time, so the transaction holds an exclusive lock
//! over both capacity rows for the whole read-check-write sequence. Capacity
//! writers queue on an in-process gate first; `with_lock_timeout` bounds that
//! wait and surfaces `StateError::LockTimeout` past it.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
