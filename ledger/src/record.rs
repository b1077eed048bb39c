//! Ledger record types: the append-only audit trail of money movements.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use strongbox_common::{AccountId, Amount, PageRequest, RecordId};

/// Kind of money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// Funds entering an account.
    Deposit,
    /// Funds leaving an account.
    Withdraw,
    /// Funds moving between two accounts.
    Transfer,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Deposit => "deposit",
            RecordType::Withdraw => "withdraw",
            RecordType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(RecordType::Deposit),
            "withdraw" => Ok(RecordType::Withdraw),
            "transfer" => Ok(RecordType::Transfer),
            other => Err(format!("unknown record type '{other}'")),
        }
    }
}

/// Record status. The engine only ever writes `Completed`; the other
/// values are accepted when reading rows written by other tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "completed" => Ok(RecordStatus::Completed),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(format!("unknown record status '{other}'")),
        }
    }
}

/// An immutable ledger record as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Unique record ID.
    pub id: RecordId,
    /// Debited account (absent for deposits).
    pub from_account_id: Option<AccountId>,
    /// Credited account (absent for withdrawals).
    pub to_account_id: Option<AccountId>,
    /// Amount moved, always positive.
    pub amount: Decimal,
    /// Movement kind.
    #[serde(rename = "type")]
    pub record_type: RecordType,
    /// Free text supplied by the caller.
    pub description: String,
    /// Record status.
    pub status: RecordStatus,
    /// When this record was inserted.
    pub created_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Check if the record debits or credits `account`.
    pub fn involves(&self, account: AccountId) -> bool {
        self.from_account_id == Some(account) || self.to_account_id == Some(account)
    }

    /// Effect of this record on `account`'s balance: positive for credits,
    /// negative for debits, zero if unrelated or not completed.
    pub fn signed_amount_for(&self, account: AccountId) -> Decimal {
        if self.status != RecordStatus::Completed {
            return Decimal::ZERO;
        }

        let mut effect = Decimal::ZERO;
        if self.to_account_id == Some(account) {
            effect += self.amount;
        }
        if self.from_account_id == Some(account) {
            effect -= self.amount;
        }
        effect
    }
}

/// A record about to be inserted. Constructors enforce the account-field
/// shape of each movement kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
    pub amount: Decimal,
    pub record_type: RecordType,
    pub description: String,
}

impl NewRecord {
    /// Deposit into `to`.
    pub fn deposit(to: AccountId, amount: Amount, description: impl Into<String>) -> Self {
        Self {
            from_account_id: None,
            to_account_id: Some(to),
            amount: amount.value(),
            record_type: RecordType::Deposit,
            description: description.into(),
        }
    }

    /// Withdrawal from `from`.
    pub fn withdraw(from: AccountId, amount: Amount, description: impl Into<String>) -> Self {
        Self {
            from_account_id: Some(from),
            to_account_id: None,
            amount: amount.value(),
            record_type: RecordType::Withdraw,
            description: description.into(),
        }
    }

    /// Transfer from `from` to `to`. Callers reject `from == to` first.
    pub fn transfer(
        from: AccountId,
        to: AccountId,
        amount: Amount,
        description: impl Into<String>,
    ) -> Self {
        debug_assert_ne!(from, to, "transfer record with identical accounts");
        Self {
            from_account_id: Some(from),
            to_account_id: Some(to),
            amount: amount.value(),
            record_type: RecordType::Transfer,
            description: description.into(),
        }
    }

    /// Materialize as a completed record with an assigned id.
    pub fn completed(self, id: RecordId, created_at: DateTime<Utc>) -> LedgerRecord {
        LedgerRecord {
            id,
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
            record_type: self.record_type,
            description: self.description,
            status: RecordStatus::Completed,
            created_at,
        }
    }
}

/// One page of an account's records, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<LedgerRecord>,
    pub page: u32,
    pub limit: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

impl RecordPage {
    /// Assemble a page from a slice of records and the unpaged total.
    pub fn new(records: Vec<LedgerRecord>, request: PageRequest, total_count: u64) -> Self {
        Self {
            records,
            page: request.page(),
            limit: request.limit(),
            total_count,
            total_pages: request.total_pages(total_count),
        }
    }
}
