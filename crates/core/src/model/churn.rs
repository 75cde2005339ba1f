use crate::domain::features::{CustomerFeatures, FEATURE_DIM};
use crate::model::eval::EvaluationReport;
use crate::model::ProbabilityClassifier;
use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Logistic regression over standardized RFM features.
///
/// Deliberately small: the serving contract only needs
/// `predict_probability`, so anything honoring that seam can replace this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnModel {
    weights: Array1<f64>,
    bias: f64,
    feature_means: Array1<f64>,
    feature_stds: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 500,
            learning_rate: 0.1,
            l2: 1e-3,
        }
    }
}

/// Trained classifier plus the evaluation computed at training time; this is
/// the payload of the churn artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedChurn {
    pub model: ChurnModel,
    pub evaluation: EvaluationReport,
}

impl ChurnModel {
    /// Fits on rows of `x` (n x FEATURE_DIM) against labels in {0, 1}.
    ///
    /// Aborts when the labels contain fewer than two classes: a one-class
    /// fit would silently learn a constant.
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, cfg: &TrainConfig) -> Result<Self> {
        anyhow::ensure!(x.nrows() > 0, "training set is empty");
        anyhow::ensure!(
            x.ncols() == FEATURE_DIM,
            "expected {FEATURE_DIM} features per row (got {})",
            x.ncols()
        );
        anyhow::ensure!(
            x.nrows() == y.len(),
            "feature/label row mismatch: {} rows vs {} labels",
            x.nrows(),
            y.len()
        );
        let positives = y.iter().filter(|v| **v > 0.5).count();
        anyhow::ensure!(
            positives > 0 && positives < y.len(),
            "training aborted: need both churned and retained examples ({positives} churned of {})",
            y.len()
        );

        let n = x.nrows() as f64;
        let feature_means = x.mean_axis(Axis(0)).context("empty feature matrix")?;

        let mut feature_stds = Array1::<f64>::zeros(FEATURE_DIM);
        for j in 0..FEATURE_DIM {
            let mean = feature_means[j];
            let var = x.column(j).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            // Constant columns standardize to 0, not NaN.
            feature_stds[j] = if std > 0.0 { std } else { 1.0 };
        }

        let mut xs = x.clone();
        for j in 0..FEATURE_DIM {
            let mean = feature_means[j];
            let std = feature_stds[j];
            xs.column_mut(j).mapv_inplace(|v| (v - mean) / std);
        }

        let mut weights = Array1::<f64>::zeros(FEATURE_DIM);
        let mut bias = 0.0_f64;
        for _ in 0..cfg.epochs {
            let z = xs.dot(&weights) + bias;
            let p = z.mapv(sigmoid);
            let err = &p - y;
            let grad_w = xs.t().dot(&err) / n + &weights * cfg.l2;
            let grad_b = err.sum() / n;
            weights = weights - grad_w * cfg.learning_rate;
            bias -= cfg.learning_rate * grad_b;
        }

        Ok(Self {
            weights,
            bias,
            feature_means,
            feature_stds,
        })
    }

    /// Probability for one raw (unstandardized) feature vector.
    pub fn predict_vector(&self, vector: &[f64; FEATURE_DIM]) -> f64 {
        let mut z = self.bias;
        for j in 0..FEATURE_DIM {
            let scaled = (vector[j] - self.feature_means[j]) / self.feature_stds[j];
            z += self.weights[j] * scaled;
        }
        sigmoid(z)
    }

    /// One score per row of `x`.
    pub fn predict_batch(&self, x: &Array2<f64>) -> Vec<f64> {
        x.outer_iter()
            .map(|row| {
                let mut z = self.bias;
                for j in 0..row.len() {
                    z += self.weights[j] * (row[j] - self.feature_means[j]) / self.feature_stds[j];
                }
                sigmoid(z)
            })
            .collect()
    }
}

impl ProbabilityClassifier for ChurnModel {
    fn predict_probability(&self, features: &CustomerFeatures) -> f64 {
        self.predict_vector(&features.to_vector())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
