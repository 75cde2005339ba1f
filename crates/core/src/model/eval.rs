use anyhow::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Precision/recall/F1 for one outcome class at the 0.5 decision threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Held-out evaluation summary, persisted inside the churn artifact.
/// `auc` is None when the evaluation split contains a single class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub auc: Option<f64>,
    pub churned: ClassMetrics,
    pub retained: ClassMetrics,
    pub rows: usize,
}

/// Shuffled train/test index split, deterministic for a given seed. Tiny
/// inputs can produce an empty side; callers fall back to in-sample eval.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_len = ((n as f64) * test_fraction).round() as usize;
    let test = indices[..test_len].to_vec();
    let train = indices[test_len..].to_vec();
    (train, test)
}

/// Scores are churn probabilities; labels are the observed outcomes.
pub fn evaluate(scores: &[f64], labels: &[bool]) -> Result<EvaluationReport> {
    anyhow::ensure!(!scores.is_empty(), "evaluation set is empty");
    anyhow::ensure!(
        scores.len() == labels.len(),
        "score/label length mismatch: {} vs {}",
        scores.len(),
        labels.len()
    );

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    let mut tn = 0usize;
    for (score, churned) in scores.iter().zip(labels) {
        match (*score > 0.5, *churned) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }

    Ok(EvaluationReport {
        auc: auc(scores, labels),
        churned: class_metrics(tp, fp, fn_, tp + fn_),
        // For the retained class the roles flip: a true negative is a
        // correct "retained" call.
        retained: class_metrics(tn, fn_, fp, tn + fp),
        rows: scores.len(),
    })
}

fn class_metrics(tp: usize, fp: usize, fn_: usize, support: usize) -> ClassMetrics {
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ClassMetrics {
        precision,
        recall,
        f1,
        support,
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Tie-aware rank AUC (the Mann-Whitney statistic). None when either class
/// is absent.
fn auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    let n_pos = labels.iter().filter(|churned| **churned).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| {
        scores[*a]
            .partial_cmp(&scores[*b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Tied scores share the average of their rank range.
    let mut ranks = vec![0.0_f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for k in i..=j {
            ranks[order[k]] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(churned, _)| **churned)
        .map(|(_, rank)| *rank)
        .sum();

    Some((pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0) / (n_pos as f64 * n_neg as f64))
}
