//! Dashboard metrics and the pre-computed summary document
//!
//! The summary lives at `system_stats/dashboard` by default and is written
//! exclusively by the remote recomputation job. Field names match the stored
//! camelCase keys; missing or malformed numerics decode to 0.

use crate::lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The aggregate shape shown on the dashboard, identical in both modes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    #[serde(default, deserialize_with = "lenient::count")]
    pub total_commitments: u64,

    /// Reported equal to `pending_commitments` when computed from raw records
    #[serde(default, deserialize_with = "lenient::count")]
    pub active_commitments: u64,

    #[serde(default, deserialize_with = "lenient::count")]
    pub pending_commitments: u64,

    #[serde(default, deserialize_with = "lenient::count")]
    pub over_due_commitments: u64,

    #[serde(default, deserialize_with = "lenient::count")]
    pub completed_commitments: u64,

    #[serde(default, deserialize_with = "lenient::count")]
    pub total_companies: u64,

    #[serde(default, deserialize_with = "lenient::non_negative_amount")]
    pub total_amount: f64,

    #[serde(default, deserialize_with = "lenient::non_negative_amount")]
    pub paid_amount: f64,

    #[serde(default, deserialize_with = "lenient::non_negative_amount")]
    pub pending_amount: f64,

    #[serde(default, deserialize_with = "lenient::count")]
    pub current_month_payments: u64,

    #[serde(default, deserialize_with = "lenient::non_negative_amount")]
    pub current_month_payment_amount: f64,
}

impl DashboardMetrics {
    /// Share of the total amount already paid (0.0-1.0)
    pub fn paid_ratio(&self) -> f64 {
        if self.total_amount <= 0.0 {
            return 0.0;
        }
        (self.paid_amount / self.total_amount).clamp(0.0, 1.0)
    }
}

/// Pre-computed summary document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    #[serde(flatten)]
    pub metrics: DashboardMetrics,

    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
}
