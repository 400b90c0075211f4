// Snapshot cache: TTL state machine, single-flight refresh, write-through
pub mod store;

pub use store::{CacheConfig, CacheError, CacheState, SnapshotCache};
