use serde::{Deserialize, Serialize};

/// Model input layout: [recency_days, frequency, monetary_value, aov].
pub const FEATURE_DIM: usize = 4;

/// Per-customer RFM row. `recency_days` is measured against the snapshot
/// date; `aov` is 0 whenever the division would be undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFeatures {
    pub recency_days: i64,
    pub frequency: u64,
    pub monetary_value: f64,
    pub aov: f64,
}

impl CustomerFeatures {
    pub fn to_vector(&self) -> [f64; FEATURE_DIM] {
        [
            self.recency_days as f64,
            self.frequency as f64,
            self.monetary_value,
            self.aov,
        ]
    }
}
