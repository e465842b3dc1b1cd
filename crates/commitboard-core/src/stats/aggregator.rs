//! Raw recomputation of the dashboard metrics
//!
//! Pure and deterministic: the reference instant is passed in. Its time zone
//! decides what "current month" means.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use commitboard_types::{CommitmentRecord, DashboardMetrics, PaymentRecord};
use std::collections::HashSet;

/// Fold commitments and payments into dashboard metrics
///
/// `activeCommitments` mirrors `pendingCommitments`. Payments without a date
/// count as made at `now`; 4x1000 tax payments never count.
pub fn aggregate<Tz: TimeZone>(
    commitments: &[CommitmentRecord],
    payments: &[PaymentRecord],
    now: &DateTime<Tz>,
) -> DashboardMetrics {
    let now_utc = now.with_timezone(&Utc);
    let mut metrics = DashboardMetrics {
        total_commitments: commitments.len() as u64,
        ..DashboardMetrics::default()
    };

    let mut companies: HashSet<&str> = HashSet::new();

    for commitment in commitments {
        metrics.total_amount += commitment.amount;

        if commitment.is_paid() {
            metrics.completed_commitments += 1;
            metrics.paid_amount += commitment.amount;
        } else {
            metrics.pending_commitments += 1;
            metrics.pending_amount += commitment.amount;
            if commitment.is_overdue(now_utc) {
                metrics.over_due_commitments += 1;
            }
        }

        if let Some(company) = commitment.company_id.as_deref() {
            companies.insert(company);
        }
    }

    metrics.active_commitments = metrics.pending_commitments;
    metrics.total_companies = companies.len() as u64;

    let tz = now.timezone();
    for payment in payments {
        if payment.is_4x1000_tax {
            continue;
        }
        let paid_at = payment
            .date
            .map(|d| d.with_timezone(&tz))
            .unwrap_or_else(|| now.clone());
        if paid_at.year() == now.year() && paid_at.month() == now.month() {
            metrics.current_month_payments += 1;
            metrics.current_month_payment_amount += payment.amount;
        }
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    fn commitment(value: serde_json::Value) -> CommitmentRecord {
        serde_json::from_value(value).unwrap()
    }

    fn payment(value: serde_json::Value) -> PaymentRecord {
        serde_json::from_value(value).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_commitment_partition() {
        let commitments = vec![
            commitment(json!({"amount": 100, "status": "paid", "companyId": "c1"})),
            commitment(json!({"amount": 250, "status": "pending", "dueDate": "2026-03-01", "companyId": "c1"})),
            commitment(json!({"amount": "50", "dueDate": "2026-04-01", "companyId": "c2"})),
            commitment(json!({"amount": 10, "paid": true})),
        ];

        let metrics = aggregate(&commitments, &[], &now());

        assert_eq!(metrics.total_commitments, 4);
        assert_eq!(metrics.completed_commitments, 2);
        assert_eq!(metrics.pending_commitments, 2);
        assert_eq!(metrics.active_commitments, 2);
        assert_eq!(metrics.over_due_commitments, 1);
        assert_eq!(metrics.total_companies, 2);
        assert_eq!(metrics.total_amount, 410.0);
        assert_eq!(metrics.paid_amount, 110.0);
        assert_eq!(metrics.pending_amount, 300.0);
    }

    #[test]
    fn test_paid_commitment_never_overdue() {
        let commitments = vec![commitment(
            json!({"amount": 5, "status": "Completed", "dueDate": "2020-01-01"}),
        )];
        let metrics = aggregate(&commitments, &[], &now());
        assert_eq!(metrics.over_due_commitments, 0);
    }

    #[test]
    fn test_current_month_excludes_tax() {
        let payments = vec![
            payment(json!({"amount": 300, "date": "2026-03-02"})),
            payment(json!({"amount": 40, "date": "2026-03-03", "is4x1000Tax": true})),
            payment(json!({"amount": 999, "date": "2026-02-28"})),
            payment(json!({"amount": 999, "date": "2025-03-10"})),
        ];

        let metrics = aggregate(&[], &payments, &now());
        assert_eq!(metrics.current_month_payments, 1);
        assert_eq!(metrics.current_month_payment_amount, 300.0);
    }

    #[test]
    fn test_undated_payment_counts_as_now() {
        let payments = vec![payment(json!({"amount": 12}))];
        let metrics = aggregate(&[], &payments, &now());
        assert_eq!(metrics.current_month_payments, 1);
    }

    #[test]
    fn test_month_boundary_follows_reference_zone() {
        // now is 2026-04-01T01:00Z: still March in UTC-5, already April in UTC
        let bogota = FixedOffset::west_opt(5 * 3600).unwrap();
        let local_now = bogota.with_ymd_and_hms(2026, 3, 31, 20, 0, 0).unwrap();
        let payments = vec![payment(json!({"amount": 7, "date": "2026-03-31T22:00:00Z"}))];

        assert_eq!(aggregate(&[], &payments, &local_now).current_month_payments, 1);
        assert_eq!(
            aggregate(&[], &payments, &local_now.with_timezone(&Utc)).current_month_payments,
            0
        );
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(aggregate(&[], &[], &now()), DashboardMetrics::default());
    }
}
