// Aggregation core: data model, reconciliation, pagination
pub mod types;       // AssetRecord, Snapshot, PartialUpdate, provider payloads
pub mod merge;       // primary-wins / secondary-enriches reconciliation
pub mod pagination;  // cursor-addressed pages over one snapshot

pub use types::*;
