//! Error types for commitboard-core
//!
//! Provides a comprehensive error hierarchy with thiserror for graceful degradation.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for commitboard operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // Backend Errors
    // ===================
    #[error("Permission denied: {resource}")]
    PermissionDenied { resource: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("Backend error on {resource}: {message}")]
    Backend { resource: String, message: String },

    #[error("No authenticated user")]
    NotAuthenticated,

    #[error("Invalid document path: {path} - {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Failed to decode {resource}: {message}")]
    Decode {
        resource: String,
        message: String,
        #[source]
        source: serde_json::Error,
    },

    // ===================
    // Write Errors
    // ===================
    #[error("Batch of {size} writes exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Batch commit rejected: {message}")]
    BatchRejected { message: String },

    #[error("Remote procedure {procedure} failed: {message}")]
    RemoteCall { procedure: String, message: String },

    // ===================
    // Local Cache Errors
    // ===================
    #[error("Failed to read cache file: {path}")]
    CacheRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write cache file: {path}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ===================
    // Config Errors
    // ===================
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to read config file: {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {message}")]
    ConfigParse {
        path: PathBuf,
        message: String,
        #[source]
        source: toml::de::Error,
    },
}

impl CoreError {
    pub fn permission_denied(resource: impl Into<String>) -> Self {
        Self::PermissionDenied {
            resource: resource.into(),
        }
    }

    pub fn backend(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Expected during logout: listeners race the revoked credentials
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// The whole backend is gone, not just one resource
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Severity of an issue recorded during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Skipped a single item, result is slightly approximate
    Warning,
    /// Skipped a whole collection or folder
    Error,
    /// Scan could not produce a meaningful result
    Fatal,
}

/// Individual entry in a scan report
#[derive(Debug, Clone)]
pub struct ScanIssue {
    pub source: String,
    pub message: String,
    pub severity: IssueSeverity,
}

impl ScanIssue {
    pub fn warning(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: IssueSeverity::Warning,
        }
    }

    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: IssueSeverity::Error,
        }
    }

    pub fn fatal(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            severity: IssueSeverity::Fatal,
        }
    }
}

/// Report of everything skipped while producing a storage snapshot
///
/// Skips never fail the scan; they only make the result more approximate.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub issues: Vec<ScanIssue>,
    pub collections_counted: usize,
    pub collections_failed: usize,
    pub folders_scanned: usize,
    pub folders_failed: usize,
    pub subfolders_scanned: usize,
    pub subfolders_skipped: usize,
    pub items_failed: usize,
}

impl ScanReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_issue(&mut self, issue: ScanIssue) {
        self.issues.push(issue);
    }

    pub fn add_warning(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ScanIssue::warning(source, message));
    }

    pub fn add_fatal(&mut self, source: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ScanIssue::fatal(source, message));
    }

    pub fn has_fatal_issues(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Fatal)
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns count by severity
    pub fn issue_count(&self) -> (usize, usize, usize) {
        let count = |severity| self.issues.iter().filter(|i| i.severity == severity).count();
        (
            count(IssueSeverity::Warning),
            count(IssueSeverity::Error),
            count(IssueSeverity::Fatal),
        )
    }
}
