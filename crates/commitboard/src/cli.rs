//! Output formatting for the CLI subcommands

use comfy_table::{Cell, Color, ContentArrangement, Table};
use commitboard_core::{AlertsView, MetricsCache, ScanReport};
use commitboard_types::{AlertRecord, StorageUsageSnapshot};

fn table(headers: &[&str], no_color: bool) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    if no_color {
        table.set_header(headers.to_vec());
    } else {
        table.set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    }
    table
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

/// Format money with thousands separators and 2 decimals
pub fn format_amount(amount: f64) -> String {
    let cents = (amount * 100.0).round() as i64;
    let (sign, cents) = if cents < 0 { ("-", -cents) } else { ("", cents) };
    let whole = (cents / 100).to_string();

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}.{:02}", cents % 100)
}

pub fn format_stats(cache: &MetricsCache, json: bool, no_color: bool) -> String {
    if json {
        return to_json(cache);
    }

    let m = &cache.metrics;
    let mut table = table(&["Metric", "Value"], no_color);
    let rows: [(&str, String); 11] = [
        ("Total commitments", m.total_commitments.to_string()),
        ("Active", m.active_commitments.to_string()),
        ("Pending", m.pending_commitments.to_string()),
        ("Overdue", m.over_due_commitments.to_string()),
        ("Completed", m.completed_commitments.to_string()),
        ("Companies", m.total_companies.to_string()),
        ("Total amount", format_amount(m.total_amount)),
        ("Paid amount", format_amount(m.paid_amount)),
        ("Pending amount", format_amount(m.pending_amount)),
        ("Payments this month", m.current_month_payments.to_string()),
        (
            "Paid this month",
            format_amount(m.current_month_payment_amount),
        ),
    ];
    for (label, value) in rows {
        table.add_row(vec![label.to_string(), value]);
    }

    let updated = cache
        .last_updated
        .map(|ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut out = format!("Mode: {}   Last updated: {}\n", cache.mode.as_str(), updated);
    out.push_str(&table.to_string());
    if cache.is_fallback() {
        out.push_str(
            "\nSummary missing, showing live recomputation. Run `commitboard refresh` to rebuild it.",
        );
    }
    if let Some(error) = &cache.error {
        out.push_str(&format!("\nError: {error}"));
    }
    out
}

pub fn format_storage(
    snapshot: &StorageUsageSnapshot,
    report: Option<&ScanReport>,
    json: bool,
    no_color: bool,
) -> String {
    if json {
        return to_json(snapshot);
    }

    let mut table = table(&["Used (GB)", "Capacity (GB)", "Usage", "Documents", "Images", "Files"], no_color);
    table.add_row(vec![
        format!("{:.2}", snapshot.used),
        format!("{:.2}", snapshot.total),
        format!("{:.1}%", snapshot.usage_percent()),
        snapshot.documents.to_string(),
        snapshot.images.to_string(),
        snapshot.files.to_string(),
    ]);

    let mut out = table.to_string();
    if let Some(report) = report.filter(|r| !r.is_clean()) {
        let (warnings, errors, fatal) = report.issue_count();
        out.push_str(&format!(
            "\nSkipped: {warnings} warnings, {errors} errors, {fatal} fatal"
        ));
        for issue in &report.issues {
            out.push_str(&format!("\n  - {}: {}", issue.source, issue.message));
        }
    }
    out
}

fn alert_row(alert: &AlertRecord) -> Vec<String> {
    vec![
        alert.id.clone(),
        format!("{:?}", alert.severity).to_lowercase(),
        if alert.read { "yes" } else { "no" }.to_string(),
        alert
            .created_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string()),
        alert.title.clone().unwrap_or_default(),
    ]
}

pub fn format_alerts(view: &AlertsView, json: bool, no_color: bool) -> String {
    if json {
        return to_json(view);
    }
    if view.alerts.is_empty() {
        return "No alerts.".to_string();
    }

    let mut table = table(&["ID", "Severity", "Read", "Created", "Title"], no_color);
    for alert in &view.alerts {
        table.add_row(alert_row(alert));
    }

    format!(
        "{} alerts, {} unread (critical {}, warning {}, info {})\n{}",
        view.total_count,
        view.unread_count,
        view.critical_alerts.len(),
        view.warning_alerts.len(),
        view.info_alerts.len(),
        table
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use commitboard_core::StatsMode;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0.0), "0.00");
        assert_eq!(format_amount(1234567.891), "1,234,567.89");
        assert_eq!(format_amount(999.5), "999.50");
        assert_eq!(format_amount(-1500.0), "-1,500.00");
    }

    #[test]
    fn test_empty_alerts() {
        assert_eq!(format_alerts(&AlertsView::default(), false, true), "No alerts.");
    }

    #[test]
    fn test_stats_table_mentions_mode() {
        let out = format_stats(&MetricsCache::default(), false, true);
        assert!(out.starts_with("Mode: uninitialized"));
        assert!(out.contains("Total commitments"));
    }

    #[test]
    fn test_fallback_stats_suggest_refresh() {
        let fallback = MetricsCache {
            mode: StatsMode::Fallback,
            ..MetricsCache::default()
        };
        let out = format_stats(&fallback, false, true);
        assert!(out.starts_with("Mode: fallback"));
        assert!(out.contains("commitboard refresh"));

        let optimized = MetricsCache {
            mode: StatsMode::Optimized,
            ..MetricsCache::default()
        };
        assert!(!format_stats(&optimized, false, true).contains("commitboard refresh"));
    }

    #[test]
    fn test_storage_json() {
        let out = format_storage(&StorageUsageSnapshot::default(), None, true, true);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["total"], serde_json::json!(5.0));
    }
}
