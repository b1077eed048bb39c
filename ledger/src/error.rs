//! Ledger error types.

use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use strongbox_common::{AccountId, RecordId, ValidationError};

use crate::account::AccountStatus;
use crate::store::FailPoint;

/// Which side of an operation an account plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRole {
    /// The single account of a deposit or withdrawal.
    Account,
    /// Debited side of a transfer.
    Sender,
    /// Credited side of a transfer.
    Recipient,
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRole::Account => f.write_str("account"),
            AccountRole::Sender => f.write_str("sender account"),
            AccountRole::Recipient => f.write_str("recipient account"),
        }
    }
}

/// Stable error classes exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ValidationError,
    AccountNotFound,
    AccountNotActive,
    InsufficientFunds,
    RecordNotFound,
    InfrastructureFailure,
}

/// Errors raised by the account and record stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No account row with this id.
    #[error("account {0} not found")]
    NotFound(AccountId),

    /// No record row with this id.
    #[error("record {0} not found")]
    RecordNotFound(RecordId),

    /// Driver or connection failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Store did not answer in time.
    #[error("store timed out: {0}")]
    Timeout(String),

    /// Failure armed through fault injection.
    #[error("injected failure at {0:?}")]
    Injected(FailPoint),
}

/// Main error type for ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Input rejected before any unit was opened.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Transfer with identical source and destination.
    #[error("Cannot transfer to your own account ({0})")]
    SelfTransfer(AccountId),

    /// Referenced account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account exists but may not change balance.
    #[error("{role} {account_id} is {status}")]
    AccountNotActive {
        account_id: AccountId,
        status: AccountStatus,
        role: AccountRole,
    },

    /// Balance at lock time is below the requested amount.
    #[error("Insufficient funds: have {available:.2}, need {requested:.2}")]
    InsufficientFunds {
        account_id: AccountId,
        available: Decimal,
        requested: Decimal,
    },

    /// Referenced record does not exist.
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// The unit did not finish within the configured bound.
    #[error("Ledger operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store could not complete the unit. Details stay in the source.
    #[error("Ledger storage failure")]
    Infrastructure(#[source] StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => LedgerError::AccountNotFound(id),
            StoreError::RecordNotFound(id) => LedgerError::RecordNotFound(id),
            other => LedgerError::Infrastructure(other),
        }
    }
}

impl LedgerError {
    /// Error class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) | LedgerError::SelfTransfer(_) => ErrorKind::ValidationError,
            LedgerError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            LedgerError::AccountNotActive { .. } => ErrorKind::AccountNotActive,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::RecordNotFound(_) => ErrorKind::RecordNotFound,
            LedgerError::Timeout(_) | LedgerError::Infrastructure(_) => {
                ErrorKind::InfrastructureFailure
            }
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::SelfTransfer(_) => "SELF_TRANSFER",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::AccountNotActive { .. } => "ACCOUNT_NOT_ACTIVE",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::RecordNotFound(_) => "RECORD_NOT_FOUND",
            LedgerError::Timeout(_) => "TIMEOUT",
            LedgerError::Infrastructure(_) => "INFRASTRUCTURE_FAILURE",
        }
    }

    /// Whether a caller may resubmit. The engine never retries on its own:
    /// it does not deduplicate, so only the caller can know a retry is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Timeout(_) | LedgerError::Infrastructure(_))
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
