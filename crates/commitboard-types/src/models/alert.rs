//! Alert records and per-user alert configuration

use crate::lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity as stored on the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Error,
    Warning,
    /// Also used for anything unclassified
    #[default]
    Info,
    Success,
}

impl AlertSeverity {
    /// Parse a stored severity. Matching is exact and case-sensitive;
    /// anything else, `"ERROR"` included, maps to `Info`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "critical" => Self::Critical,
            "error" => Self::Error,
            "warning" => Self::Warning,
            "success" => Self::Success,
            _ => Self::Info,
        }
    }

    pub fn bucket(self) -> AlertBucket {
        match self {
            Self::Critical | Self::Error => AlertBucket::Critical,
            Self::Warning => AlertBucket::Warning,
            Self::Info | Self::Success => AlertBucket::Info,
        }
    }
}

/// Display grouping of alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertBucket {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAlert {
    #[serde(default)]
    id: String,
    #[serde(default, deserialize_with = "lenient::text")]
    severity: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient::text")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    read: bool,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    read_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::text")]
    read_by: Option<String>,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::text")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    message: Option<String>,
}

/// A dashboard alert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredAlert")]
pub struct AlertRecord {
    pub id: String,
    pub severity: AlertSeverity,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub read_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub message: Option<String>,
}

impl From<StoredAlert> for AlertRecord {
    fn from(stored: StoredAlert) -> Self {
        // `severity` wins over the older `type` field
        let severity = stored
            .severity
            .or(stored.kind)
            .map(|raw| AlertSeverity::parse(&raw))
            .unwrap_or_default();

        Self {
            id: stored.id,
            severity,
            read: stored.read,
            read_at: stored.read_at,
            read_by: stored.read_by,
            created_at: stored.created_at,
            title: stored.title,
            message: stored.message,
        }
    }
}

/// Notification preferences stored at `alertsConfig/<uid>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertConfig {
    pub email_notifications: bool,
    pub push_notifications: bool,
    pub critical_alerts: bool,
    pub warning_alerts: bool,
    pub info_alerts: bool,
    pub reminder_alerts: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            email_notifications: true,
            push_notifications: true,
            critical_alerts: true,
            warning_alerts: true,
            info_alerts: false,
            reminder_alerts: true,
        }
    }
}

impl AlertConfig {
    /// Whether alerts of this bucket should notify the user
    pub fn notifies(&self, bucket: AlertBucket) -> bool {
        match bucket {
            AlertBucket::Critical => self.critical_alerts,
            AlertBucket::Warning => self.warning_alerts,
            AlertBucket::Info => self.info_alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_buckets() {
        assert_eq!(AlertSeverity::parse("critical").bucket(), AlertBucket::Critical);
        assert_eq!(AlertSeverity::parse("error").bucket(), AlertBucket::Critical);
        assert_eq!(AlertSeverity::parse("warning").bucket(), AlertBucket::Warning);
        assert_eq!(AlertSeverity::parse("success").bucket(), AlertBucket::Info);
        assert_eq!(AlertSeverity::parse("mystery").bucket(), AlertBucket::Info);
    }

    #[test]
    fn test_severity_is_case_sensitive() {
        assert_eq!(AlertSeverity::parse("error"), AlertSeverity::Error);
        assert_eq!(AlertSeverity::parse("ERROR"), AlertSeverity::Info);
        assert_eq!(AlertSeverity::parse("Critical"), AlertSeverity::Info);
        assert_eq!(AlertSeverity::parse(" warning"), AlertSeverity::Info);

        let alert: AlertRecord =
            serde_json::from_value(json!({"severity": "WARNING"})).unwrap();
        assert_eq!(alert.severity.bucket(), AlertBucket::Info);
    }

    #[test]
    fn test_alert_severity_falls_back_to_type() {
        let alert: AlertRecord =
            serde_json::from_value(json!({"id": "a1", "type": "warning"})).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert!(!alert.read);

        let both: AlertRecord =
            serde_json::from_value(json!({"severity": "error", "type": "info"})).unwrap();
        assert_eq!(both.severity, AlertSeverity::Error);

        let none: AlertRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(none.severity, AlertSeverity::Info);
    }

    #[test]
    fn test_alert_config_default_disables_info() {
        let config = AlertConfig::default();
        assert!(!config.info_alerts);
        assert!(config.critical_alerts && config.warning_alerts && config.reminder_alerts);
        assert!(!config.notifies(AlertBucket::Info));
    }

    #[test]
    fn test_partial_alert_config_keeps_defaults() {
        let config: AlertConfig = serde_json::from_value(json!({"infoAlerts": true})).unwrap();
        assert!(config.info_alerts);
        assert!(config.email_notifications);
    }
}
