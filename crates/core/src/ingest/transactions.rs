use crate::domain::transaction::Transaction;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Loads a transaction log from CSV with header
/// `customer_id,transaction_date,amount,product_id` (dates as YYYY-MM-DD).
pub fn load_transactions(path: &Path) -> Result<Vec<Transaction>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open transactions file {}", path.display()))?;

    let mut transactions = Vec::new();
    for (idx, row) in reader.deserialize::<Transaction>().enumerate() {
        let tx = row.with_context(|| format!("parse transaction row {}", idx + 1))?;
        tx.validate()
            .with_context(|| format!("invalid transaction row {}", idx + 1))?;
        transactions.push(tx);
    }

    tracing::info!(path = %path.display(), rows = transactions.len(), "transactions loaded");
    Ok(transactions)
}

#[derive(Debug, Deserialize)]
struct LabelRow {
    customer_id: i64,
    churned: u8,
}

/// Loads churn outcomes from CSV with header `customer_id,churned` (0/1).
/// Keyed by customer_id so the trainer can join on keys instead of row
/// positions.
pub fn load_labels(path: &Path) -> Result<BTreeMap<i64, bool>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open labels file {}", path.display()))?;

    let mut labels = BTreeMap::new();
    for (idx, row) in reader.deserialize::<LabelRow>().enumerate() {
        let row = row.with_context(|| format!("parse label row {}", idx + 1))?;
        anyhow::ensure!(
            row.churned <= 1,
            "label row {}: churned must be 0 or 1 (got {})",
            idx + 1,
            row.churned
        );
        anyhow::ensure!(
            labels.insert(row.customer_id, row.churned == 1).is_none(),
            "label row {}: duplicate customer_id {}",
            idx + 1,
            row.customer_id
        );
    }

    tracing::info!(path = %path.display(), labels = labels.len(), "labels loaded");
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_well_formed_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "tx.csv",
            "customer_id,transaction_date,amount,product_id\n\
             101,2023-01-01,50.0,1\n\
             102,2023-01-02,20,2\n",
        );

        let txs = load_transactions(&path).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].customer_id, 101);
        assert_eq!(txs[0].transaction_date.to_string(), "2023-01-01");
        assert_eq!(txs[1].amount, 20.0);
    }

    #[test]
    fn rejects_negative_amounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "tx.csv",
            "customer_id,transaction_date,amount,product_id\n101,2023-01-01,-5,1\n",
        );

        let err = load_transactions(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid transaction row 1"));
    }

    #[test]
    fn parses_labels_as_booleans() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "labels.csv", "customer_id,churned\n1,0\n2,1\n");

        let labels = load_labels(&path).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&1], false);
        assert_eq!(labels[&2], true);
    }

    #[test]
    fn rejects_duplicate_label_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "labels.csv", "customer_id,churned\n1,0\n1,1\n");

        let err = load_labels(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate customer_id 1"));
    }

    #[test]
    fn rejects_out_of_range_label_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "labels.csv", "customer_id,churned\n1,2\n");

        assert!(load_labels(&path).is_err());
    }
}
