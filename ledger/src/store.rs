//! Storage contracts consumed by the ledger engine.
//!
//! A [`LedgerStore`] opens atomic units. Everything a unit writes becomes
//! visible at once on [`LedgerUnit::commit`] or never. Implementations must
//! treat dropping an unfinished unit exactly like [`LedgerUnit::discard`],
//! so cancellation and unwinding cannot leak partial writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use strongbox_common::{AccountId, PageRequest, RecordId};

use crate::account::{Account, AccountStatus};
use crate::error::StoreError;
use crate::record::{LedgerRecord, NewRecord, RecordPage};

/// Steps at which a store can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    LockAndRead,
    WriteBalance,
    InsertRecord,
    Commit,
}

/// Opens atomic units of work.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Unit type handed out by this store.
    type Unit: LedgerUnit;

    /// Open a new unit.
    async fn begin_unit(&self) -> Result<Self::Unit, StoreError>;
}

/// One open atomic unit.
#[async_trait]
pub trait LedgerUnit: Send {
    /// Take the row's exclusive lock, blocking until it is free, then read
    /// the balance. Locking a row the unit already holds returns at once.
    async fn lock_and_read_balance(&mut self, account: AccountId) -> Result<Decimal, StoreError>;

    /// Stage a new balance. Fails with `NotFound` when no row matches.
    async fn write_balance(&mut self, account: AccountId, balance: Decimal)
        -> Result<(), StoreError>;

    /// Read the account status.
    async fn read_status(&mut self, account: AccountId) -> Result<AccountStatus, StoreError>;

    /// Append a completed record; the id is assigned here.
    async fn insert_record(&mut self, record: NewRecord) -> Result<LedgerRecord, StoreError>;

    /// Publish every staged write and release the unit's locks.
    async fn commit(self) -> Result<(), StoreError>;

    /// Drop every staged write and release the unit's locks.
    async fn discard(self) -> Result<(), StoreError>;
}

/// Read side used outside mutations. Never takes exclusive locks.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Load an account row.
    async fn account(&self, account: AccountId) -> Result<Account, StoreError>;

    /// Committed balance.
    async fn balance(&self, account: AccountId) -> Result<Decimal, StoreError> {
        Ok(self.account(account).await?.balance)
    }

    /// Load one record.
    async fn record(&self, id: RecordId) -> Result<LedgerRecord, StoreError>;

    /// Records debiting or crediting `account`, newest first.
    async fn records_for_account(
        &self,
        account: AccountId,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError>;

    /// The `limit` most recent records involving `account`, newest first.
    async fn recent_records(
        &self,
        account: AccountId,
        limit: u32,
    ) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Records involving `account` created within `[from, to]` inclusive,
    /// newest first.
    async fn records_between(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Credits minus debits over the account's completed records.
    async fn derived_balance(&self, account: AccountId) -> Result<Decimal, StoreError>;

    /// Stored and derived balance read together. The default reads them
    /// separately; stores that can take one snapshot should override it.
    async fn reconciliation_figures(
        &self,
        account: AccountId,
    ) -> Result<(Decimal, Decimal), StoreError> {
        let stored = self.balance(account).await?;
        let derived = self.derived_balance(account).await?;
        Ok((stored, derived))
    }
}
