//! Raw commitment and payment records, read only in fallback mode
//!
//! Both collections were written by several generations of forms, so the same
//! concept has several spellings (`status: "paid"`, `paid: true`,
//! `paymentStatus: "pagado"`, ...). The decoding here folds them into one shape
//! and the paid/pending rule lives in [`CommitmentRecord::payment_state`] only.

use crate::lenient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status strings that mean "settled"
const PAID_STATUSES: &[&str] = &["paid", "completed", "pagado"];

/// Settlement state of a commitment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Paid,
    Pending,
}

/// A financial commitment (an amount owed by a company, due on a date)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentRecord {
    #[serde(default)]
    pub id: String,

    #[serde(default, deserialize_with = "lenient::amount")]
    pub amount: f64,

    #[serde(default, deserialize_with = "lenient::text")]
    pub status: Option<String>,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub paid: bool,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_paid: bool,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub completed: bool,

    #[serde(default, deserialize_with = "lenient::text")]
    pub payment_status: Option<String>,

    #[serde(default, deserialize_with = "lenient::timestamp")]
    pub due_date: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "lenient::text")]
    pub company_id: Option<String>,
}

impl CommitmentRecord {
    /// Classify the commitment. This is the single paid/pending rule.
    pub fn payment_state(&self) -> PaymentState {
        let status_paid = |status: &Option<String>| {
            status
                .as_deref()
                .map(|s| PAID_STATUSES.iter().any(|p| s.eq_ignore_ascii_case(p)))
                .unwrap_or(false)
        };

        if self.paid
            || self.is_paid
            || self.completed
            || status_paid(&self.status)
            || status_paid(&self.payment_status)
        {
            PaymentState::Paid
        } else {
            PaymentState::Pending
        }
    }

    pub fn is_paid(&self) -> bool {
        self.payment_state() == PaymentState::Paid
    }

    /// Pending and due strictly before `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_paid() && self.due_date.map(|due| due < now).unwrap_or(false)
    }
}

/// Stored payment shape before the date/amount fallbacks are resolved
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPayment {
    #[serde(default)]
    id: String,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    total_amount: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient::timestamp")]
    payment_date: Option<DateTime<Utc>>,
    #[serde(default, rename = "is4x1000Tax", deserialize_with = "lenient::flag")]
    is_4x1000_tax: bool,
}

/// A payment made against a commitment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredPayment")]
pub struct PaymentRecord {
    pub id: String,
    pub amount: f64,
    /// `date`, else `createdAt`, else `paymentDate`
    pub date: Option<DateTime<Utc>>,
    /// Automatic 4x1000 bank-tax adjustment, never a real payment
    #[serde(rename = "is4x1000Tax")]
    pub is_4x1000_tax: bool,
}

impl From<StoredPayment> for PaymentRecord {
    fn from(stored: StoredPayment) -> Self {
        let amount = stored
            .amount
            .as_ref()
            .filter(|v| !v.is_null())
            .or(stored.total_amount.as_ref())
            .map(lenient::amount_from_value)
            .unwrap_or(0.0);

        Self {
            id: stored.id,
            amount,
            date: stored.date.or(stored.created_at).or(stored.payment_date),
            is_4x1000_tax: stored.is_4x1000_tax,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn commitment(value: serde_json::Value) -> CommitmentRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_paid_representations() {
        assert!(commitment(json!({"status": "paid"})).is_paid());
        assert!(commitment(json!({"status": "Completed"})).is_paid());
        assert!(commitment(json!({"status": "PAGADO"})).is_paid());
        assert!(commitment(json!({"paid": true})).is_paid());
        assert!(commitment(json!({"isPaid": true})).is_paid());
        assert!(commitment(json!({"paymentStatus": "paid"})).is_paid());

        assert!(!commitment(json!({"status": "pending"})).is_paid());
        assert!(!commitment(json!({"paid": "true"})).is_paid());
        assert!(!commitment(json!({})).is_paid());
    }

    #[test]
    fn test_commitment_coercion() {
        let record = commitment(json!({
            "amount": "1500.75",
            "dueDate": {"seconds": 1_700_000_000, "nanoseconds": 0},
            "companyId": ""
        }));
        assert_eq!(record.amount, 1500.75);
        assert_eq!(record.due_date, Utc.timestamp_opt(1_700_000_000, 0).single());
        assert!(record.company_id.is_none());
    }

    #[test]
    fn test_overdue_requires_pending_and_past_due() {
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 12, 0, 0).unwrap();
        let past = commitment(json!({"status": "pending", "dueDate": "2026-05-01"}));
        let future = commitment(json!({"status": "pending", "dueDate": "2026-06-01"}));
        let paid_past = commitment(json!({"status": "paid", "dueDate": "2026-05-01"}));
        let undated = commitment(json!({"status": "pending"}));

        assert!(past.is_overdue(now));
        assert!(!future.is_overdue(now));
        assert!(!paid_past.is_overdue(now));
        assert!(!undated.is_overdue(now));
    }

    #[test]
    fn test_payment_fallbacks() {
        let payment: PaymentRecord = serde_json::from_value(json!({
            "totalAmount": "80",
            "createdAt": "2026-02-03T00:00:00Z",
            "is4x1000Tax": true
        }))
        .unwrap();
        assert_eq!(payment.amount, 80.0);
        assert_eq!(
            payment.date,
            Some(Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap())
        );
        assert!(payment.is_4x1000_tax);
    }

    #[test]
    fn test_payment_amount_preferred_over_total() {
        let payment: PaymentRecord =
            serde_json::from_value(json!({"amount": 10, "totalAmount": 99, "date": "2026-01-01"}))
                .unwrap();
        assert_eq!(payment.amount, 10.0);
        assert!(!payment.is_4x1000_tax);
    }
}
