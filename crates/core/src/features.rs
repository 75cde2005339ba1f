use crate::domain::features::CustomerFeatures;
use crate::domain::transaction::Transaction;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

/// Snapshot fallback: one day after the most recent observed transaction, so
/// recency is measured against observed activity rather than wall-clock time.
pub fn resolve_snapshot_date(
    transactions: &[Transaction],
    snapshot_date: Option<NaiveDate>,
) -> Option<NaiveDate> {
    snapshot_date.or_else(|| {
        transactions
            .iter()
            .map(|tx| tx.transaction_date)
            .max()
            .map(|last| last + Duration::days(1))
    })
}

/// Aggregates a transaction log into one RFM row per customer.
///
/// The returned map is keyed by customer_id and its iteration order is the
/// canonical row order for anything downstream that joins against it.
/// Duplicate rows are counted independently on purpose: the log is the
/// ground truth, deduplication belongs upstream if anywhere.
pub fn build_rfm_features(
    transactions: &[Transaction],
    snapshot_date: Option<NaiveDate>,
) -> BTreeMap<i64, CustomerFeatures> {
    let Some(snapshot) = resolve_snapshot_date(transactions, snapshot_date) else {
        return BTreeMap::new();
    };

    tracing::info!(%snapshot, rows = transactions.len(), "generating RFM features");

    // (last_seen, frequency, monetary_value) per customer.
    let mut grouped: BTreeMap<i64, (NaiveDate, u64, f64)> = BTreeMap::new();
    for tx in transactions {
        let entry = grouped
            .entry(tx.customer_id)
            .or_insert((tx.transaction_date, 0, 0.0));
        if tx.transaction_date > entry.0 {
            entry.0 = tx.transaction_date;
        }
        entry.1 += 1;
        entry.2 += tx.amount;
    }

    let features: BTreeMap<i64, CustomerFeatures> = grouped
        .into_iter()
        .map(|(customer_id, (last_seen, frequency, monetary_value))| {
            let recency_days = (snapshot - last_seen).num_days();
            let aov = if frequency == 0 {
                0.0
            } else {
                monetary_value / frequency as f64
            };
            // A non-finite aov must never leak into a feature row.
            let aov = if aov.is_finite() { aov } else { 0.0 };
            (
                customer_id,
                CustomerFeatures {
                    recency_days,
                    frequency,
                    monetary_value,
                    aov,
                },
            )
        })
        .collect();

    tracing::info!(customers = features.len(), "features generated");
    features
}
