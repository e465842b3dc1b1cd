//! commitboard-types - Shared data types for commitboard
//!
//! This crate contains pure data structures without heavy dependencies.
//! No tokio, no async runtime - just serde-serializable types.
//!
//! Used by:
//! - commitboard-core (aggregation, caching, alert ledger)
//! - commitboard (CLI output)

pub mod lenient;
pub mod models;

pub use models::{
    AggregateSnapshot, AlertBucket, AlertConfig, AlertRecord, AlertSeverity, CommitmentRecord,
    DashboardMetrics, PaymentRecord, PaymentState, StorageUsageSnapshot, DEFAULT_CAPACITY_GB,
};
