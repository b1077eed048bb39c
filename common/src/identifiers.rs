//! Identifier types for ledger entities.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Unique identifier for an account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Wrap a raw row id without checking it.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Parse a caller-supplied id, rejecting non-positive values.
    pub fn validated(id: i64) -> Result<Self, ValidationError> {
        let id = Self(id);
        if !id.is_valid() {
            return Err(ValidationError::new("account_id", "invalid account ID"));
        }
        Ok(id)
    }

    /// Row ids start at 1.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }

    /// Get the raw id.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a ledger record, assigned at insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Wrap a raw row id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
