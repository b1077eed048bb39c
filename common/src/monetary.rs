//! Monetary types for the ledger.
//!
//! Balances and amounts are fixed-point decimals with at most two
//! fractional digits. Floats never touch money.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Fractional digits allowed in any amount or balance.
pub const MONEY_SCALE: u32 = 2;

/// Default per-operation ceiling (1,000,000.00).
pub const DEFAULT_MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Check that a value carries no more than [`MONEY_SCALE`] significant
/// fractional digits. Trailing zeros do not count.
pub fn has_money_scale(value: Decimal) -> bool {
    value.normalize().scale() <= MONEY_SCALE
}

/// A strictly positive amount with cent precision, bounded by a policy maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    /// Validate `value` against the default policy.
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        AmountPolicy::default().validate(value)
    }

    /// Parse and validate a decimal string such as `"1000.00"`.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let value: Decimal = s
            .trim()
            .parse()
            .map_err(|_| ValidationError::new("amount", "amount is not a valid number"))?;
        Self::new(value)
    }

    /// Get the decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Amount::new(value).map_err(serde::de::Error::custom)
    }
}

/// Bounds applied to every incoming amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountPolicy {
    /// Largest amount a single operation may move.
    pub max_amount: Decimal,
}

impl AmountPolicy {
    /// Create a policy with the given ceiling.
    pub fn new(max_amount: Decimal) -> Self {
        Self { max_amount }
    }

    /// Validate a raw value into an [`Amount`].
    pub fn validate(&self, value: Decimal) -> Result<Amount, ValidationError> {
        if value <= Decimal::ZERO {
            return Err(ValidationError::new("amount", "amount must be greater than 0"));
        }
        if value > self.max_amount {
            return Err(ValidationError::new("amount", "amount exceeds maximum allowed"));
        }
        if !has_money_scale(value) {
            return Err(ValidationError::new(
                "amount",
                "amount can have at most 2 decimal places",
            ));
        }
        Ok(Amount(value.round_dp(MONEY_SCALE)))
    }

    /// Re-check an amount validated under a different policy.
    pub fn check(&self, amount: Amount) -> Result<Amount, ValidationError> {
        self.validate(amount.value())
    }
}

impl Default for AmountPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AMOUNT)
    }
}
