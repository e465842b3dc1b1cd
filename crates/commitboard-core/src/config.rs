//! Dashboard configuration
//!
//! Loaded from `~/.config/commitboard/config.toml`. Every field is optional;
//! missing ones take the defaults below.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub stats: StatsConfig,
    pub storage: StorageConfig,
    pub alerts: AlertsConfig,
}

/// Stats aggregator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// `collection/id` of the pre-computed summary
    pub summary_document: String,
    pub commitments_collection: String,
    pub payments_collection: String,
    /// Remote job that rewrites the summary
    pub recompute_procedure: String,
    /// How long `refresh()` waits for the summary to advance
    pub refresh_timeout_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            summary_document: "system_stats/dashboard".to_string(),
            commitments_collection: "commitments".to_string(),
            payments_collection: "payments".to_string(),
            recompute_procedure: "recalculateDashboardStats".to_string(),
            refresh_timeout_secs: 30,
        }
    }
}

impl StatsConfig {
    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

/// Storage scanner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Collections whose record counts make up `documents`
    pub collections: Vec<String>,
    /// Known top-level folders of the object store
    pub folders: Vec<String>,
    /// Subfolders visited per top-level folder
    pub max_subfolders: usize,
    /// Subfolders with a longer full path are skipped
    pub max_path_len: usize,
    pub capacity_gb: f64,
    /// Reported when no collection could be counted
    pub placeholder_documents: u64,
    pub ttl_secs: u64,
    /// Opt-in automatic scan after sign-in
    pub auto_scan: bool,
    pub auto_scan_delay_secs: u64,
    /// Key of the cached snapshot in the local store
    pub cache_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            collections: owned(&[
                "users",
                "commitments",
                "companies",
                "payments",
                "files",
                "incomes",
            ]),
            folders: owned(&[
                "logos",
                "receipts",
                "profile-photos",
                "company-documents",
                "liquidaciones",
                "payments",
                "commitments",
            ]),
            max_subfolders: 20,
            max_path_len: 200,
            capacity_gb: commitboard_types::DEFAULT_CAPACITY_GB,
            placeholder_documents: 50,
            ttl_secs: 30 * 60,
            auto_scan: false,
            auto_scan_delay_secs: 5,
            cache_key: "storage_stats".to_string(),
        }
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl StorageConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn auto_scan_delay(&self) -> Duration {
        Duration::from_secs(self.auto_scan_delay_secs)
    }
}

/// Alert ledger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub collection: String,
    /// Size of the live window, newest first
    pub limit: usize,
    /// Per-user configuration documents live at `<config_collection>/<uid>`
    pub config_collection: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            collection: "alerts".to_string(),
            limit: 50,
            config_collection: "alertsConfig".to_string(),
        }
    }
}

impl DashboardConfig {
    /// Default location under the user config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("commitboard").join("config.toml"))
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(CoreError::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config: Self = toml::from_str(&content).map_err(|e| CoreError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
            source: e,
        })?;
        config.validate()?;

        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Load from the default location, or defaults when there is none
    pub fn load_default() -> Result<Self, CoreError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |message: &str| {
            Err(CoreError::InvalidConfig {
                message: message.to_string(),
            })
        };

        if crate::backend::DocPath::parse(&self.stats.summary_document).is_err() {
            return invalid("stats.summary_document must be collection/id");
        }
        if self.alerts.limit == 0 {
            return invalid("alerts.limit must be positive");
        }
        if !self.storage.capacity_gb.is_finite() || self.storage.capacity_gb <= 0.0 {
            return invalid("storage.capacity_gb must be positive");
        }
        Ok(())
    }
}
