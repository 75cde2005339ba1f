pub mod churn;
pub mod eval;
pub mod recsys;

use crate::domain::features::CustomerFeatures;
use serde::{Deserialize, Serialize};

/// Churn-side capability: map one feature row to a probability in [0, 1].
/// The serving layer depends on this seam, not on the concrete model.
pub trait ProbabilityClassifier {
    fn predict_probability(&self, features: &CustomerFeatures) -> f64;
}

/// RecSys-side capability: ranked similar items for a seed item.
pub trait ItemSimilarity {
    fn similar_items(&self, product_id: i64, top_n: usize) -> anyhow::Result<Vec<ScoredItem>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub product_id: i64,
    pub score: f64,
}
