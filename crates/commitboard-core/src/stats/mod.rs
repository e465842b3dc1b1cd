//! Dashboard metrics: pre-computed summary with a live raw fallback
//!
//! The client prefers the summary document written by the remote aggregation
//! job. While it does not exist, the raw commitments and payments are
//! subscribed and folded through [`aggregate`] on every change.

mod aggregator;
mod client;

pub use aggregator::aggregate;
pub use client::{RefreshOutcome, StatsAggregatorClient};

use chrono::{DateTime, Utc};
use commitboard_types::DashboardMetrics;
use serde::Serialize;

/// Where the current metrics come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsMode {
    /// No emission seen yet
    #[default]
    Uninitialized,
    /// Read from the pre-computed summary
    Optimized,
    /// Recomputed from the raw collections
    Fallback,
}

impl StatsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StatsMode::Uninitialized => "uninitialized",
            StatsMode::Optimized => "optimized",
            StatsMode::Fallback => "fallback",
        }
    }
}

/// Last known metrics for the session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsCache {
    pub metrics: DashboardMetrics,
    pub mode: StatsMode,
    pub loading: bool,
    pub error: Option<String>,
    /// `lastUpdated` of the summary; absent in fallback mode
    pub last_updated: Option<DateTime<Utc>>,
}

impl MetricsCache {
    pub fn is_optimized(&self) -> bool {
        self.mode == StatsMode::Optimized
    }

    pub fn is_fallback(&self) -> bool {
        self.mode == StatsMode::Fallback
    }
}
