use anyhow::Context;
use c360_core::domain::transaction::Transaction;
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    /// Number of customers to generate purchase histories for.
    pub customers: usize,

    /// RNG seed; re-running with the same seed regenerates the same data.
    pub seed: u64,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            customers: 500,
            seed: 42,
        }
    }
}

impl SyntheticOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(s) = std::env::var("SYNTHETIC_CUSTOMERS") {
            if let Ok(n) = s.parse::<usize>() {
                out.customers = n;
            }
        }

        if let Ok(s) = std::env::var("SYNTHETIC_SEED") {
            if let Ok(n) = s.parse::<u64>() {
                out.seed = n;
            }
        }

        out
    }
}

/// Seeded purchase history with a planted churn signal: churners stopped
/// buying weeks ago and spent little, retained customers are recent and
/// heavier spenders. Enough structure for the classifier to learn from.
pub fn churn_training_set(
    opts: &SyntheticOptions,
) -> anyhow::Result<(Vec<Transaction>, BTreeMap<i64, bool>)> {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let end = NaiveDate::from_ymd_opt(2023, 6, 30).context("invalid base date")?;

    let mut transactions = Vec::new();
    let mut labels = BTreeMap::new();
    for customer_id in 1..=opts.customers as i64 {
        let churned = rng.gen_bool(0.35);
        let purchases = rng.gen_range(1..=6);
        for _ in 0..purchases {
            let (days_back, amount): (i64, f64) = if churned {
                (rng.gen_range(45..120), rng.gen_range(10.0..60.0))
            } else {
                (rng.gen_range(0..21), rng.gen_range(60.0..500.0))
            };
            transactions.push(Transaction {
                customer_id,
                transaction_date: end - Duration::days(days_back),
                amount,
                product_id: rng.gen_range(1..=20),
            });
        }
        labels.insert(customer_id, churned);
    }

    Ok((transactions, labels))
}

/// Four taste clusters over twenty products; customers buy repeatedly within
/// their cluster's block, giving the factorization co-purchase structure.
pub fn interaction_set(opts: &SyntheticOptions) -> anyhow::Result<Vec<Transaction>> {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let base = NaiveDate::from_ymd_opt(2023, 6, 1).context("invalid base date")?;

    let mut transactions = Vec::new();
    for customer_id in 1..=opts.customers as i64 {
        let cluster = customer_id % 4;
        let purchases = rng.gen_range(3..=8);
        for _ in 0..purchases {
            let product_id = cluster * 5 + rng.gen_range(1..=5);
            transactions.push(Transaction {
                customer_id,
                transaction_date: base + Duration::days(rng.gen_range(0..30)),
                amount: rng.gen_range(10.0..200.0),
                product_id,
            });
        }
    }

    Ok(transactions)
}
