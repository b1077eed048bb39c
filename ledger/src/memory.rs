//! In-memory account and record store.
//!
//! Each account row carries a `tokio` mutex that plays the role of a
//! `SELECT ... FOR UPDATE` row lock: a unit holds the owned guard from the
//! first lock until commit or discard. Balance writes and new records are
//! staged inside the unit and published under a store-wide commit gate, so
//! shared readers never see half of a commit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use strongbox_common::{AccountId, PageRequest, RecordId};

use crate::account::{Account, AccountStatus};
use crate::error::StoreError;
use crate::record::{LedgerRecord, NewRecord, RecordPage};
use crate::store::{FailPoint, LedgerReader, LedgerStore, LedgerUnit};

/// One account row.
struct AccountRow {
    /// Exclusive row lock.
    row_lock: Arc<tokio::sync::Mutex<()>>,
    /// Committed state.
    state: RwLock<Account>,
}

#[derive(Default)]
struct Inner {
    accounts: DashMap<AccountId, Arc<AccountRow>>,
    /// Committed records in commit order.
    records: RwLock<Vec<LedgerRecord>>,
    /// Held exclusively while a commit publishes its writes.
    commit_gate: RwLock<()>,
    next_account_id: AtomicI64,
    next_record_id: AtomicI64,
    armed_failure: Mutex<Option<FailPoint>>,
    lock_trace: Mutex<Option<Vec<AccountId>>>,
}

impl Inner {
    fn row(&self, account: AccountId) -> Result<Arc<AccountRow>, StoreError> {
        self.accounts
            .get(&account)
            .map(|row| Arc::clone(row.value()))
            .ok_or(StoreError::NotFound(account))
    }

    fn trip(&self, point: FailPoint) -> Result<(), StoreError> {
        let mut armed = self.armed_failure.lock();
        if *armed == Some(point) {
            *armed = None;
            return Err(StoreError::Injected(point));
        }
        Ok(())
    }

    fn trace_lock(&self, account: AccountId) {
        if let Some(trace) = self.lock_trace.lock().as_mut() {
            trace.push(account);
        }
    }

    /// Committed records involving `account` that pass `keep`, newest first.
    fn records_involving(
        &self,
        account: AccountId,
        keep: impl Fn(&LedgerRecord) -> bool,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        self.row(account)?;

        let mut matching: Vec<LedgerRecord> = {
            let _gate = self.commit_gate.read();
            self.records
                .read()
                .iter()
                .filter(|r| r.involves(account) && keep(*r))
                .cloned()
                .collect()
        };
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(matching)
    }
}

/// Thread-safe in-memory ledger store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account at zero balance with active status.
    pub fn create_account(&self) -> Account {
        let id = AccountId::new(self.inner.next_account_id.fetch_add(1, Ordering::SeqCst) + 1);
        let account = Account::new(id);

        self.inner.accounts.insert(
            id,
            Arc::new(AccountRow {
                row_lock: Arc::new(tokio::sync::Mutex::new(())),
                state: RwLock::new(account.clone()),
            }),
        );

        info!(account_id = %id, "Account created");
        account
    }

    /// Change an account's status. Waits for any unit holding the row.
    pub async fn set_status(
        &self,
        account: AccountId,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        let row = self.inner.row(account)?;
        let _row_guard = row.row_lock.lock().await;

        let _gate = self.inner.commit_gate.write();
        let mut state = row.state.write();
        state.status = status;
        state.updated_at = Utc::now();

        info!(account_id = %account, status = %status, "Account status changed");
        Ok(())
    }

    /// Arm a one-shot failure at the given step of the next unit to reach it.
    pub fn inject_failure(&self, point: FailPoint) {
        *self.inner.armed_failure.lock() = Some(point);
    }

    /// Start recording the order in which row locks are taken.
    pub fn enable_lock_trace(&self) {
        *self.inner.lock_trace.lock() = Some(Vec::new());
    }

    /// Drain the recorded lock order.
    pub fn take_lock_trace(&self) -> Vec<AccountId> {
        self.inner
            .lock_trace
            .lock()
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Ids of all accounts, ascending.
    pub fn account_ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.inner.accounts.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// Number of committed records.
    pub fn record_count(&self) -> usize {
        let _gate = self.inner.commit_gate.read();
        self.inner.records.read().len()
    }

    /// Consistent copy of every account and record.
    pub fn snapshot(&self) -> (Vec<Account>, Vec<LedgerRecord>) {
        let _gate = self.inner.commit_gate.read();
        let mut accounts: Vec<Account> = self
            .inner
            .accounts
            .iter()
            .map(|row| row.state.read().clone())
            .collect();
        accounts.sort_by_key(|a| a.id);
        let records = self.inner.records.read().clone();
        (accounts, records)
    }
}

/// A held row lock plus the row it protects.
struct HeldRow {
    row: Arc<AccountRow>,
    _guard: OwnedMutexGuard<()>,
}

/// Open unit against a [`MemoryLedgerStore`]. Dropping it releases its row
/// locks and forgets everything it staged.
pub struct MemoryUnit {
    inner: Arc<Inner>,
    held: BTreeMap<AccountId, HeldRow>,
    staged_balances: BTreeMap<AccountId, Decimal>,
    staged_records: Vec<LedgerRecord>,
}

impl MemoryUnit {
    async fn hold(&mut self, account: AccountId) -> Result<&HeldRow, StoreError> {
        if !self.held.contains_key(&account) {
            let row = self.inner.row(account)?;
            let guard = Arc::clone(&row.row_lock).lock_owned().await;
            self.inner.trace_lock(account);
            debug!(account_id = %account, "Row lock acquired");
            self.held.insert(account, HeldRow { row, _guard: guard });
        }
        self.held.get(&account).ok_or(StoreError::NotFound(account))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Unit = MemoryUnit;

    async fn begin_unit(&self) -> Result<MemoryUnit, StoreError> {
        Ok(MemoryUnit {
            inner: Arc::clone(&self.inner),
            held: BTreeMap::new(),
            staged_balances: BTreeMap::new(),
            staged_records: Vec::new(),
        })
    }
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn lock_and_read_balance(&mut self, account: AccountId) -> Result<Decimal, StoreError> {
        self.inner.trip(FailPoint::LockAndRead)?;

        if let Some(staged) = self.staged_balances.get(&account) {
            return Ok(*staged);
        }
        let held = self.hold(account).await?;
        let balance = held.row.state.read().balance;
        Ok(balance)
    }

    async fn write_balance(
        &mut self,
        account: AccountId,
        balance: Decimal,
    ) -> Result<(), StoreError> {
        self.inner.trip(FailPoint::WriteBalance)?;

        self.hold(account).await?;
        self.staged_balances.insert(account, balance);
        Ok(())
    }

    async fn read_status(&mut self, account: AccountId) -> Result<AccountStatus, StoreError> {
        let row = self.inner.row(account)?;
        let status = row.state.read().status;
        Ok(status)
    }

    async fn insert_record(&mut self, record: NewRecord) -> Result<LedgerRecord, StoreError> {
        self.inner.trip(FailPoint::InsertRecord)?;

        let id = RecordId::new(self.inner.next_record_id.fetch_add(1, Ordering::SeqCst) + 1);
        let record = record.completed(id, Utc::now());
        self.staged_records.push(record.clone());
        Ok(record)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.inner.trip(FailPoint::Commit)?;

        let mut writes = Vec::with_capacity(self.staged_balances.len());
        for (account, balance) in &self.staged_balances {
            let held = self.held.get(account).ok_or(StoreError::NotFound(*account))?;
            writes.push((Arc::clone(&held.row), *balance));
        }

        {
            let _gate = self.inner.commit_gate.write();
            let now = Utc::now();
            for (row, balance) in writes {
                let mut state = row.state.write();
                state.balance = balance;
                state.updated_at = now;
            }
            self.inner
                .records
                .write()
                .extend(self.staged_records.drain(..));
        }

        debug!(rows = self.held.len(), "Unit committed");
        Ok(())
    }

    async fn discard(self) -> Result<(), StoreError> {
        debug!(
            rows = self.held.len(),
            staged_records = self.staged_records.len(),
            "Unit discarded"
        );
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for MemoryLedgerStore {
    async fn account(&self, account: AccountId) -> Result<Account, StoreError> {
        let row = self.inner.row(account)?;
        let _gate = self.inner.commit_gate.read();
        let state = row.state.read().clone();
        Ok(state)
    }

    async fn record(&self, id: RecordId) -> Result<LedgerRecord, StoreError> {
        let _gate = self.inner.commit_gate.read();
        self.inner
            .records
            .read()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::RecordNotFound(id))
    }

    async fn records_for_account(
        &self,
        account: AccountId,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError> {
        let matching = self.inner.records_involving(account, |_| true)?;

        let total = matching.len() as u64;
        let records = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok(RecordPage::new(records, page, total))
    }

    async fn recent_records(
        &self,
        account: AccountId,
        limit: u32,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        let mut recent = self.inner.records_involving(account, |_| true)?;
        recent.truncate(limit as usize);
        Ok(recent)
    }

    async fn records_between(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        self.inner
            .records_involving(account, |r| r.created_at >= from && r.created_at <= to)
    }

    async fn derived_balance(&self, account: AccountId) -> Result<Decimal, StoreError> {
        self.inner.row(account)?;

        let _gate = self.inner.commit_gate.read();
        let total = self
            .inner
            .records
            .read()
            .iter()
            .map(|r| r.signed_amount_for(account))
            .sum();
        Ok(total)
    }

    async fn reconciliation_figures(
        &self,
        account: AccountId,
    ) -> Result<(Decimal, Decimal), StoreError> {
        let row = self.inner.row(account)?;

        let _gate = self.inner.commit_gate.read();
        let stored = row.state.read().balance;
        let derived = self
            .inner
            .records
            .read()
            .iter()
            .map(|r| r.signed_amount_for(account))
            .sum();
        Ok((stored, derived))
    }
}
