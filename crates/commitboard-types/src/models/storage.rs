//! Storage usage gauge

use serde::{Deserialize, Serialize};

/// Plan capacity of the object store in GB
pub const DEFAULT_CAPACITY_GB: f64 = 5.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Approximate object-store usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsageSnapshot {
    /// Used space in GB, rounded to 2 decimals
    pub used: f64,
    /// Capacity in GB
    pub total: f64,
    /// Record count across the counted collections
    pub documents: u64,
    pub images: u64,
    /// Non-image objects
    pub files: u64,
    #[serde(default)]
    pub loading: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl Default for StorageUsageSnapshot {
    fn default() -> Self {
        Self::empty(DEFAULT_CAPACITY_GB)
    }
}

impl StorageUsageSnapshot {
    /// All-zero snapshot ("no data")
    pub fn empty(total: f64) -> Self {
        Self {
            used: 0.0,
            total,
            documents: 0,
            images: 0,
            files: 0,
            loading: false,
            error: None,
        }
    }

    /// Used space as a percentage of capacity
    pub fn usage_percent(&self) -> f64 {
        if self.total <= 0.0 {
            return 0.0;
        }
        self.used / self.total * 100.0
    }
}

/// Convert bytes to GB with 2-decimal rounding
pub fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_gb_rounding() {
        assert_eq!(bytes_to_gb(0), 0.0);
        assert_eq!(bytes_to_gb(1024 * 1024 * 1024), 1.0);
        // 1.5 GB + a few bytes
        assert_eq!(bytes_to_gb(1_610_612_736 + 10), 1.5);
        // 10 MB ~ 0.0098 GB
        assert_eq!(bytes_to_gb(10 * 1024 * 1024), 0.01);
    }

    #[test]
    fn test_usage_percent() {
        let snapshot = StorageUsageSnapshot {
            used: 1.25,
            ..Default::default()
        };
        assert!((snapshot.usage_percent() - 25.0).abs() < 1e-9);
    }
}
