use crate::domain::transaction::Transaction;
use crate::model::{ItemSimilarity, ScoredItem};
use anyhow::{Context, Result};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Dense user-item matrix pivoted from the transaction log; cell = purchase
/// count. Row/column order follows the sorted id vectors.
#[derive(Debug, Clone)]
pub struct InteractionMatrix {
    pub customer_ids: Vec<i64>,
    pub product_ids: Vec<i64>,
    pub cells: Array2<f64>,
}

pub fn build_interaction_matrix(transactions: &[Transaction]) -> InteractionMatrix {
    let customer_ids: Vec<i64> = transactions
        .iter()
        .map(|tx| tx.customer_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let product_ids: Vec<i64> = transactions
        .iter()
        .map(|tx| tx.product_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut cells = Array2::zeros((customer_ids.len(), product_ids.len()));
    for tx in transactions {
        // Both ids came from this same log, so the lookups always hit.
        if let (Ok(row), Ok(col)) = (
            customer_ids.binary_search(&tx.customer_id),
            product_ids.binary_search(&tx.product_id),
        ) {
            cells[[row, col]] += 1.0;
        }
    }

    InteractionMatrix {
        customer_ids,
        product_ids,
        cells,
    }
}

#[derive(Debug, Clone)]
pub struct FactorizationConfig {
    pub factors: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
    pub seed: u64,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            factors: 5,
            epochs: 300,
            learning_rate: 0.05,
            l2: 0.01,
            seed: 42,
        }
    }
}

/// Low-rank factorization of the interaction matrix. Serving only consumes
/// the item side (as `ItemEmbeddings`); the user side stays with the full
/// model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecsysModel {
    pub customer_ids: Vec<i64>,
    pub product_ids: Vec<i64>,
    pub user_factors: Array2<f64>,
    pub item_factors: Array2<f64>,
}

impl RecsysModel {
    /// Seeded SGD over every cell of the dense matrix (zeros included) on
    /// squared reconstruction error with L2 shrinkage. Items nobody bought
    /// keep near-zero embeddings; that degeneracy is accepted, not corrected.
    pub fn fit(matrix: &InteractionMatrix, cfg: &FactorizationConfig) -> Result<Self> {
        let (n_users, n_items) = matrix.cells.dim();
        anyhow::ensure!(n_users > 0 && n_items > 0, "interaction matrix is empty");
        anyhow::ensure!(
            cfg.factors >= 1,
            "embedding dimensionality must be >= 1 (got {})",
            cfg.factors
        );

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut user_factors =
            Array2::from_shape_fn((n_users, cfg.factors), |_| rng.gen_range(0.0..0.1));
        let mut item_factors =
            Array2::from_shape_fn((n_items, cfg.factors), |_| rng.gen_range(0.0..0.1));

        for epoch in 0..cfg.epochs {
            let mut squared_error = 0.0;
            for i in 0..n_users {
                for j in 0..n_items {
                    let mut predicted = 0.0;
                    for f in 0..cfg.factors {
                        predicted += user_factors[[i, f]] * item_factors[[j, f]];
                    }
                    let err = matrix.cells[[i, j]] - predicted;
                    squared_error += err * err;
                    for f in 0..cfg.factors {
                        let uf = user_factors[[i, f]];
                        let vf = item_factors[[j, f]];
                        user_factors[[i, f]] = uf + cfg.learning_rate * (err * vf - cfg.l2 * uf);
                        item_factors[[j, f]] = vf + cfg.learning_rate * (err * uf - cfg.l2 * vf);
                    }
                }
            }
            if epoch % 50 == 0 {
                tracing::debug!(
                    epoch,
                    mse = squared_error / (n_users * n_items) as f64,
                    "factorization epoch"
                );
            }
        }

        Ok(Self {
            customer_ids: matrix.customer_ids.clone(),
            product_ids: matrix.product_ids.clone(),
            user_factors,
            item_factors,
        })
    }

    pub fn item_embeddings(&self) -> ItemEmbeddings {
        ItemEmbeddings {
            product_ids: self.product_ids.clone(),
            vectors: self.item_factors.clone(),
        }
    }
}

/// Item-embedding matrix (items x k); the artifact the serving layer loads
/// for /recommend/items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEmbeddings {
    pub product_ids: Vec<i64>,
    pub vectors: Array2<f64>,
}

impl ItemEmbeddings {
    pub fn len(&self) -> usize {
        self.product_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.product_ids.is_empty()
    }
}

impl ItemSimilarity for ItemEmbeddings {
    /// Cosine ranking of every other item against the seed item's vector.
    fn similar_items(&self, product_id: i64, top_n: usize) -> Result<Vec<ScoredItem>> {
        let seed_idx = self
            .product_ids
            .binary_search(&product_id)
            .ok()
            .with_context(|| format!("unknown product_id {product_id}"))?;
        let seed = self.vectors.row(seed_idx);

        let mut scored: Vec<ScoredItem> = self
            .product_ids
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != seed_idx)
            .map(|(idx, id)| ScoredItem {
                product_id: *id,
                score: cosine(seed, self.vectors.row(idx)),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_n);
        Ok(scored)
    }
}

/// Zero-norm vectors (cold items) score 0 instead of NaN.
fn cosine(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let dot = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;

    fn tx(customer_id: i64, product_id: i64) -> Transaction {
        Transaction {
            customer_id,
            transaction_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            amount: 10.0,
            product_id,
        }
    }

    // Customers 1-3 buy only items 10 and 11; customers 4-6 only 20 and 21.
    fn block_structured_log() -> Vec<Transaction> {
        let mut txs = Vec::new();
        for customer in 1..=3 {
            for product in [10, 11] {
                txs.push(tx(customer, product));
                txs.push(tx(customer, product));
            }
        }
        for customer in 4..=6 {
            for product in [20, 21] {
                txs.push(tx(customer, product));
                txs.push(tx(customer, product));
            }
        }
        txs
    }

    #[test]
    fn interaction_matrix_counts_purchases() {
        let txs = vec![tx(1, 10), tx(1, 10), tx(2, 20)];
        let matrix = build_interaction_matrix(&txs);

        assert_eq!(matrix.customer_ids, vec![1, 2]);
        assert_eq!(matrix.product_ids, vec![10, 20]);
        assert_eq!(matrix.cells[[0, 0]], 2.0);
        assert_eq!(matrix.cells[[0, 1]], 0.0);
        assert_eq!(matrix.cells[[1, 1]], 1.0);
    }

    #[test]
    fn co_purchased_items_embed_closer_than_disjoint_ones() {
        let matrix = build_interaction_matrix(&block_structured_log());
        let cfg = FactorizationConfig {
            factors: 2,
            epochs: 400,
            ..Default::default()
        };
        let model = RecsysModel::fit(&matrix, &cfg).unwrap();
        let embeddings = model.item_embeddings();

        let ranked = embeddings.similar_items(10, 3).unwrap();
        assert_eq!(ranked[0].product_id, 11);

        let within = ranked.iter().find(|s| s.product_id == 11).unwrap().score;
        let across = ranked.iter().find(|s| s.product_id == 20).unwrap().score;
        assert!(within > across);
    }

    #[test]
    fn fit_is_deterministic_for_a_seed() {
        let matrix = build_interaction_matrix(&block_structured_log());
        let cfg = FactorizationConfig {
            factors: 2,
            epochs: 50,
            ..Default::default()
        };
        let a = RecsysModel::fit(&matrix, &cfg).unwrap();
        let b = RecsysModel::fit(&matrix, &cfg).unwrap();

        assert_eq!(a.item_factors, b.item_factors);
        assert_eq!(a.user_factors, b.user_factors);
    }

    #[test]
    fn cold_items_score_zero_against_everything() {
        let embeddings = ItemEmbeddings {
            product_ids: vec![1, 2, 3],
            vectors: array![[1.0, 0.0], [0.0, 0.0], [0.0, 1.0]],
        };

        let ranked = embeddings.similar_items(2, 5).unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|s| s.score == 0.0));
    }

    #[test]
    fn top_n_truncates_and_excludes_the_seed() {
        let embeddings = ItemEmbeddings {
            product_ids: vec![1, 2, 3, 4],
            vectors: array![[1.0, 0.0], [0.9, 0.1], [0.5, 0.5], [0.0, 1.0]],
        };

        let ranked = embeddings.similar_items(1, 2).unwrap();
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|s| s.product_id != 1));
        assert_eq!(ranked[0].product_id, 2);
    }

    #[test]
    fn unknown_seed_item_is_an_error() {
        let embeddings = ItemEmbeddings {
            product_ids: vec![1],
            vectors: array![[1.0]],
        };

        let err = embeddings.similar_items(99, 3).unwrap_err();
        assert!(err.to_string().contains("unknown product_id 99"));
    }
}
