//! commitboard - commitment dashboard metrics from the command line
//!
//! Runs the dashboard components against a JSON fixture of documents and
//! objects, so the degradation paths can be inspected without a live backend.

mod cli;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use commitboard_core::backend::memory::{MemoryDocumentStore, MemoryObjectStore, MemoryProcedures};
use commitboard_core::backend::{DocPath, FileKeyValueStore, SystemClock};
use commitboard_core::{
    aggregate, AuthContext, Backends, CoreError, Dashboard, DashboardConfig, RefreshOutcome,
};
use commitboard_types::{AggregateSnapshot, CommitmentRecord, PaymentRecord};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// How long to wait for listeners to deliver their first emission
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "commitboard",
    version,
    about = "Commitment dashboard metrics, storage usage and alerts",
    long_about = "Inspect the commitment dashboard against a local fixture.\n\
                  \n\
                  The fixture is a JSON file with two keys:\n\
                    documents  { \"<collection>\": { \"<id>\": { ...fields } } }\n\
                    objects    { \"<path>\": { \"size\": n, \"contentType\": \"...\" } }\n\
                  \n\
                  Examples:\n\
                    commitboard --fixture data.json stats          # Metrics (optimized or fallback)\n\
                    commitboard --fixture data.json refresh        # Recompute the summary document\n\
                    commitboard --fixture data.json storage        # Cached storage usage\n\
                    commitboard --fixture data.json alerts         # Alerts for --user\n\
                    commitboard --fixture data.json mark-all-read  # Batch-mark unread alerts\n\
                  \n\
                  Environment Variables:\n\
                    COMMITBOARD_FIXTURE              # Fixture path\n\
                    COMMITBOARD_CONFIG               # Config file (default: <config dir>/commitboard/config.toml)\n\
                    RUST_LOG                         # Log filter (default: warn)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Fixture with documents and objects
    #[arg(long, env = "COMMITBOARD_FIXTURE")]
    fixture: PathBuf,

    /// Config file
    #[arg(long, env = "COMMITBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Signed-in user id
    #[arg(long, default_value = "local")]
    user: String,

    /// Local cache file (default: <cache dir>/commitboard/local-store.json)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored table headers
    #[arg(long, global = true, env = "COMMITBOARD_NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print dashboard metrics
    Stats,
    /// Print storage usage
    Storage {
        /// Bypass the cache and rescan
        #[arg(long)]
        refresh: bool,
    },
    /// Walk the object store once and report skipped folders, without caching
    Scan,
    /// List alerts for the user
    Alerts,
    /// Mark one alert as read
    MarkRead {
        /// Alert id
        id: String,
    },
    /// Mark every unread alert as read in one batch
    MarkAllRead,
    /// Ask for a summary recomputation and wait for it
    Refresh,
    /// Drop the cached storage usage
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DashboardConfig::load(path),
        None => DashboardConfig::load_default(),
    }
    .context("Failed to load config")?;

    let fixture = read_fixture(&cli.fixture)?;
    let documents = MemoryDocumentStore::from_fixture(&fixture["documents"])
        .context("Invalid documents in fixture")?;
    let objects = MemoryObjectStore::from_fixture(&fixture["objects"])
        .context("Invalid objects in fixture")?;

    let procedures = MemoryProcedures::new();
    let summary = DocPath::parse(&config.stats.summary_document)
        .context("Invalid summary document path")?;
    register_recompute(&procedures, &documents, &config, summary);

    let cache_path = match &cli.cache {
        Some(path) => path.clone(),
        None => FileKeyValueStore::default_path().context("Failed to resolve cache path")?,
    };
    let local = FileKeyValueStore::open(&cache_path)
        .with_context(|| format!("Failed to open cache at {}", cache_path.display()))?;

    let backends = Backends {
        documents: Arc::new(documents.clone()),
        objects: Arc::new(objects),
        procedures: Arc::new(procedures),
        local: Arc::new(local),
        clock: Arc::new(SystemClock),
    };
    let auth = AuthContext::new();
    let dashboard =
        Dashboard::new(backends, config, auth.clone()).context("Failed to build dashboard")?;

    auth.sign_in(cli.user.clone());
    dashboard.start_session(&cli.user).await;

    let result = run(&cli, &dashboard, &documents).await;

    // Exiting is not a sign-out: release listeners but keep the storage cache
    tokio::join!(dashboard.stats().deactivate(), dashboard.alerts().deactivate());
    result
}

async fn run(cli: &Cli, dashboard: &Dashboard, documents: &MemoryDocumentStore) -> Result<()> {
    match &cli.command {
        Command::Stats => {
            settle_stats(dashboard).await;
            println!(
                "{}",
                cli::format_stats(&dashboard.stats().snapshot(), cli.json, cli.no_color)
            );
        }
        Command::Refresh => {
            settle_stats(dashboard).await;
            match dashboard.stats().refresh().await? {
                RefreshOutcome::Completed { .. } => {}
                RefreshOutcome::TimedOut => {
                    warn!("Recomputation did not land before the timeout");
                }
            }
            save_fixture(&cli.fixture, documents)?;
            println!(
                "{}",
                cli::format_stats(&dashboard.stats().snapshot(), cli.json, cli.no_color)
            );
        }
        Command::Storage { refresh } => {
            let snapshot = if *refresh {
                dashboard.storage().refresh().await
            } else {
                dashboard.storage().usage().await
            };
            println!(
                "{}",
                cli::format_storage(&snapshot, None, cli.json, cli.no_color)
            );
        }
        Command::Scan => {
            let (snapshot, report) = dashboard.storage().scan_with_report().await;
            println!(
                "{}",
                cli::format_storage(&snapshot, Some(&report), cli.json, cli.no_color)
            );
        }
        Command::ClearCache => {
            dashboard.storage().invalidate();
            println!("Storage cache cleared.");
        }
        Command::Alerts => {
            settle_alerts(dashboard).await;
            println!(
                "{}",
                cli::format_alerts(&dashboard.alerts().view(), cli.json, cli.no_color)
            );
        }
        Command::MarkRead { id } => {
            dashboard
                .alerts()
                .mark_as_read(id)
                .await
                .with_context(|| format!("Failed to mark alert {id} as read"))?;
            save_fixture(&cli.fixture, documents)?;
            println!("Marked {id} as read.");
        }
        Command::MarkAllRead => {
            settle_alerts(dashboard).await;
            let marked = dashboard
                .alerts()
                .mark_all_as_read()
                .await
                .context("Failed to mark alerts as read")?;
            if marked > 0 {
                save_fixture(&cli.fixture, documents)?;
            }
            println!("Marked {marked} alerts as read.");
        }
    }
    Ok(())
}

/// Recompute the summary document from the fixture's raw collections
fn register_recompute(
    procedures: &MemoryProcedures,
    documents: &MemoryDocumentStore,
    config: &DashboardConfig,
    summary: DocPath,
) {
    let store = documents.clone();
    let commitments_collection = config.stats.commitments_collection.clone();
    let payments_collection = config.stats.payments_collection.clone();

    procedures.register(config.stats.recompute_procedure.clone(), move || {
        let commitments: Vec<CommitmentRecord> = store
            .documents(&commitments_collection)
            .iter()
            .filter_map(|doc| doc.decode().ok())
            .collect();
        let payments: Vec<PaymentRecord> = store
            .documents(&payments_collection)
            .iter()
            .filter_map(|doc| doc.decode().ok())
            .collect();

        let now = Local::now();
        let snapshot = AggregateSnapshot {
            metrics: aggregate(&commitments, &payments, &now),
            last_updated: Some(now.with_timezone(&Utc)),
        };
        let data = match serde_json::to_value(&snapshot) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(CoreError::backend(
                    summary.to_string(),
                    "summary did not serialize to an object",
                ))
            }
            Err(e) => return Err(CoreError::backend(summary.to_string(), e.to_string())),
        };
        store.set_document(&summary, data);
        debug!(
            commitments = commitments.len(),
            payments = payments.len(),
            "Summary recomputed"
        );
        Ok(json!({ "success": true }))
    });
}

/// Wait until the stats client has picked a mode and finished loading
async fn settle_stats(dashboard: &Dashboard) {
    let mut rx = dashboard.stats().subscribe();
    let settled = tokio::time::timeout(
        SETTLE_TIMEOUT,
        rx.wait_for(|cache| !cache.loading && (cache.is_optimized() || cache.is_fallback())),
    )
    .await;
    if settled.is_err() {
        warn!("Stats did not settle, printing what is available");
    }
}

async fn settle_alerts(dashboard: &Dashboard) {
    let mut rx = dashboard.alerts().subscribe();
    let settled = tokio::time::timeout(SETTLE_TIMEOUT, rx.wait_for(|view| !view.loading)).await;
    if settled.is_err() {
        warn!("Alerts did not settle, printing what is available");
    }
}

fn read_fixture(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    let fixture: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse fixture {}", path.display()))?;
    Ok(json!({
        "documents": fixture.get("documents").cloned().unwrap_or_else(|| json!({})),
        "objects": fixture.get("objects").cloned().unwrap_or_else(|| json!({})),
    }))
}

/// Write documents back so alert reads and recomputed summaries persist
fn save_fixture(path: &Path, documents: &MemoryDocumentStore) -> Result<()> {
    let mut fixture = read_fixture(path)?;
    fixture["documents"] = documents.to_fixture();
    let content = serde_json::to_string_pretty(&fixture).context("Failed to encode fixture")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write fixture {}", path.display()))?;
    debug!(path = %path.display(), "Fixture saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitboard_core::backend::RemoteProcedures;
    use tempfile::TempDir;

    #[test]
    fn test_read_fixture_fills_missing_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixture.json");
        std::fs::write(&path, r#"{"documents": {"alerts": {"a1": {"read": false}}}}"#).unwrap();

        let fixture = read_fixture(&path).unwrap();
        assert_eq!(fixture["objects"], json!({}));
        assert_eq!(fixture["documents"]["alerts"]["a1"]["read"], json!(false));
    }

    #[test]
    fn test_save_fixture_keeps_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fixture.json");
        std::fs::write(
            &path,
            r#"{"documents": {}, "objects": {"logos/a.png": {"size": 10}}}"#,
        )
        .unwrap();

        let store = MemoryDocumentStore::new();
        store.set_document(
            &DocPath::new("alerts", "a1"),
            json!({"read": true}).as_object().cloned().unwrap(),
        );
        save_fixture(&path, &store).unwrap();

        let saved = read_fixture(&path).unwrap();
        assert_eq!(saved["documents"]["alerts"]["a1"]["read"], json!(true));
        assert_eq!(saved["objects"]["logos/a.png"]["size"], json!(10));
    }

    #[tokio::test]
    async fn test_recompute_writes_summary() {
        let store = MemoryDocumentStore::new();
        store.set_document(
            &DocPath::new("commitments", "c1"),
            json!({"amount": 100, "status": "pending"}).as_object().cloned().unwrap(),
        );
        let procedures = MemoryProcedures::new();
        let config = DashboardConfig::default();
        let summary = DocPath::parse(&config.stats.summary_document).unwrap();
        register_recompute(&procedures, &store, &config, summary.clone());

        procedures.call("recalculateDashboardStats").await.unwrap();

        let written = store.document(&summary).unwrap();
        assert_eq!(written["totalCommitments"], json!(1));
        assert_eq!(written["pendingAmount"], json!(100.0));
        assert!(written.contains_key("lastUpdated"));
    }
}
