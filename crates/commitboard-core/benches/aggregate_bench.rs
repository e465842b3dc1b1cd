//! Performance benchmarks for raw metrics recomputation
//!
//! Fallback mode recomputes on every emission of either collection, so the
//! fold has to stay cheap for a few thousand records.

use chrono::{Duration, Local, Utc};
use commitboard_core::aggregate;
use commitboard_types::{CommitmentRecord, PaymentRecord};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Generate commitments spread over paid/pending and past/future due dates
fn generate_commitments(count: usize) -> Vec<CommitmentRecord> {
    let now = Utc::now();
    (0..count)
        .map(|i| CommitmentRecord {
            id: format!("commitment-{}", i),
            amount: 100.0 + i as f64,
            status: Some(if i % 3 == 0 { "paid" } else { "pending" }.to_string()),
            due_date: Some(now + Duration::days(i as i64 % 60 - 30)),
            company_id: Some(format!("company-{}", i % 40)),
            ..CommitmentRecord::default()
        })
        .collect()
}

fn generate_payments(count: usize) -> Vec<PaymentRecord> {
    let now = Utc::now();
    (0..count)
        .map(|i| PaymentRecord {
            id: format!("payment-{}", i),
            amount: 50.0 + i as f64,
            date: Some(now - Duration::days(i as i64 % 90)),
            is_4x1000_tax: i % 10 == 0,
        })
        .collect()
}

fn aggregate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let now = Local::now();

    for count in [100, 1_000, 10_000] {
        let commitments = generate_commitments(count);
        let payments = generate_payments(count);
        group.bench_with_input(
            BenchmarkId::new("records", count),
            &(commitments, payments),
            |b, (commitments, payments)| {
                b.iter(|| black_box(aggregate(commitments, payments, &now)));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, aggregate_benchmark);
criterion_main!(benches);
