//! commitboard-core - Core library for commitboard
//!
//! Provides the stats aggregator, storage scanner, alert ledger, backend ports
//! and the session orchestrator that ties them to authentication.

pub mod alerts;
pub mod auth;
pub mod backend;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod event;
pub mod stats;
pub mod storage;

pub use alerts::{AlertStore, AlertsView, BatchCommitter};
pub use auth::{AuthContext, AuthState};
pub use config::DashboardConfig;
pub use dashboard::{Backends, Dashboard};
pub use error::{CoreError, ScanReport};
pub use event::{DataEvent, EventBus};
pub use stats::{aggregate, MetricsCache, RefreshOutcome, StatsAggregatorClient, StatsMode};
pub use storage::{StorageScanner, TtlCache};
