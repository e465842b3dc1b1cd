//! Data models for commitboard

pub mod alert;
pub mod records;
pub mod snapshot;
pub mod storage;

pub use alert::{AlertBucket, AlertConfig, AlertRecord, AlertSeverity};
pub use records::{CommitmentRecord, PaymentRecord, PaymentState};
pub use snapshot::{AggregateSnapshot, DashboardMetrics};
pub use storage::{StorageUsageSnapshot, DEFAULT_CAPACITY_GB};
