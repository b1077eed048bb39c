//! Balance reconciliation against the record trail.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use strongbox_common::AccountId;

/// Stored balance compared with the balance implied by completed records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Account checked.
    pub account_id: AccountId,
    /// Balance column.
    pub stored: Decimal,
    /// Credits minus debits over completed records.
    pub derived: Decimal,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl Reconciliation {
    /// Build a reconciliation result.
    pub fn new(account_id: AccountId, stored: Decimal, derived: Decimal) -> Self {
        Self {
            account_id,
            stored,
            derived,
            checked_at: Utc::now(),
        }
    }

    /// Check if both figures agree.
    pub fn is_consistent(&self) -> bool {
        self.stored == self.derived
    }

    /// Stored minus derived.
    pub fn drift(&self) -> Decimal {
        self.stored - self.derived
    }
}
