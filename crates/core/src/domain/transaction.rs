use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One row of the transaction log. Rows arrive unordered and are never
/// deduplicated: a repeated row is two purchases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub customer_id: i64,
    pub transaction_date: NaiveDate,
    pub amount: f64,
    pub product_id: i64,
}

impl Transaction {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.amount.is_finite() && self.amount >= 0.0,
            "amount must be a non-negative number (got {} for customer {})",
            self.amount,
            self.customer_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(amount: f64) -> Transaction {
        Transaction {
            customer_id: 1,
            transaction_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            amount,
            product_id: 7,
        }
    }

    #[test]
    fn accepts_zero_and_positive_amounts() {
        assert!(sample(0.0).validate().is_ok());
        assert!(sample(19.99).validate().is_ok());
    }

    #[test]
    fn rejects_negative_and_non_finite_amounts() {
        assert!(sample(-0.01).validate().is_err());
        assert!(sample(f64::NAN).validate().is_err());
        assert!(sample(f64::INFINITY).validate().is_err());
    }
}
