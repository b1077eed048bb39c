//! Core ledger engine implementation.
//!
//! Every mutation runs in one atomic unit: status check, exclusive row
//! lock, funds check, balance writes, one record insert, commit. Any error
//! after the unit opens discards it before the error reaches the caller.
//!
//! Transfers lock both rows in ascending account-id order whatever the
//! direction, so two transfers over the same pair can never each hold the
//! lock the other is waiting for. Sender/recipient roles are mapped onto
//! the locked rows only after both locks are held.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use strongbox_common::{AccountId, Amount, AmountPolicy, PageRequest, RecordId, ValidationError};

use crate::account::{Account, AccountStatus};
use crate::balance::Reconciliation;
use crate::config::LedgerConfig;
use crate::error::{AccountRole, ErrorKind, LedgerError, LedgerResult};
use crate::metrics::{ActiveOperation, LedgerMetrics, SharedMetrics};
use crate::record::{LedgerRecord, NewRecord, RecordPage, RecordType};
use crate::store::{LedgerReader, LedgerStore, LedgerUnit};
use crate::unit::{UnitPhase, UnitScope};

/// Order in which two rows must be locked: ascending id.
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// The ledger engine moves money between accounts of a [`LedgerStore`].
pub struct LedgerEngine<S> {
    store: S,
    policy: AmountPolicy,
    unit_timeout: Option<Duration>,
    metrics: SharedMetrics,
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Create a new ledger engine.
    pub fn new(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            policy: config.amount_policy(),
            unit_timeout: config.unit_timeout,
            metrics: Arc::new(LedgerMetrics::new()),
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Operation counters.
    pub fn metrics(&self) -> SharedMetrics {
        Arc::clone(&self.metrics)
    }

    /// Credit `account_id` with `amount`.
    #[instrument(skip_all, fields(account_id = %account_id, amount = %amount))]
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Amount,
        description: &str,
    ) -> LedgerResult<LedgerRecord> {
        let amount = self.admit(&[account_id], amount)?;

        self.bounded(RecordType::Deposit, async {
            let mut scope = UnitScope::new(self.store.begin_unit().await?);
            let outcome = apply_deposit(&mut scope, account_id, amount, description).await;
            scope.finish(outcome).await
        })
        .await
    }

    /// Debit `account_id` by `amount` if the balance covers it.
    #[instrument(skip_all, fields(account_id = %account_id, amount = %amount))]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Amount,
        description: &str,
    ) -> LedgerResult<LedgerRecord> {
        let amount = self.admit(&[account_id], amount)?;

        self.bounded(RecordType::Withdraw, async {
            let mut scope = UnitScope::new(self.store.begin_unit().await?);
            let outcome = apply_withdraw(&mut scope, account_id, amount, description).await;
            scope.finish(outcome).await
        })
        .await
    }

    /// Move `amount` from `from` to `to`.
    #[instrument(skip_all, fields(from = %from, to = %to, amount = %amount))]
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        description: &str,
    ) -> LedgerResult<LedgerRecord> {
        let amount = self.admit(&[from, to], amount)?;
        if from == to {
            self.metrics.validation_rejected();
            warn!(account_id = %from, "Self-transfer rejected");
            return Err(LedgerError::SelfTransfer(from));
        }

        self.bounded(RecordType::Transfer, async {
            let mut scope = UnitScope::new(self.store.begin_unit().await?);
            let outcome = apply_transfer(&mut scope, from, to, amount, description).await;
            scope.finish(outcome).await
        })
        .await
    }

    /// Input checks that run before any unit is opened.
    fn admit(&self, accounts: &[AccountId], amount: Amount) -> LedgerResult<Amount> {
        let checked = accounts
            .iter()
            .try_for_each(|id| AccountId::validated(id.get()).map(drop))
            .and_then(|()| self.policy.check(amount));

        checked.map_err(|e: ValidationError| {
            self.metrics.validation_rejected();
            warn!(field = %e.field, reason = %e.message, "Request rejected");
            LedgerError::Validation(e)
        })
    }

    /// Run a unit under the configured time bound. When the bound elapses
    /// the unit future is dropped, which discards it. A caller that stops
    /// waiting drops `active` unsettled and the operation counts as cancelled.
    async fn bounded(
        &self,
        record_type: RecordType,
        work: impl Future<Output = LedgerResult<LedgerRecord>>,
    ) -> LedgerResult<LedgerRecord> {
        let active = self.metrics.operation_started();
        let result = match self.unit_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or_else(|_| Err(LedgerError::Timeout(limit))),
            None => work.await,
        };

        observe(active, record_type, &result);
        result
    }
}

fn observe(active: ActiveOperation<'_>, record_type: RecordType, result: &LedgerResult<LedgerRecord>) {
    match result {
        Ok(record) => {
            active.committed(record_type);
            info!(
                record_id = %record.id,
                record_type = %record_type,
                amount = %record.amount,
                "Operation committed"
            );
        }
        Err(e) => {
            active.failed(e);
            if e.kind() == ErrorKind::InfrastructureFailure {
                error!(code = e.error_code(), error = ?e, "Operation failed; unit discarded");
            } else {
                warn!(code = e.error_code(), error = %e, "Operation rejected; unit discarded");
            }
        }
    }
}

impl<S: LedgerStore + LedgerReader> LedgerEngine<S> {
    /// Committed balance, read without the exclusive lock.
    pub async fn get_balance(&self, account_id: AccountId) -> LedgerResult<Decimal> {
        Ok(self.store.balance(account_id).await?)
    }

    /// Committed account row.
    pub async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        Ok(self.store.account(account_id).await?)
    }

    /// One record by id.
    pub async fn get_record(&self, record_id: RecordId) -> LedgerResult<LedgerRecord> {
        Ok(self.store.record(record_id).await?)
    }

    /// An account's records, newest first.
    pub async fn account_records(
        &self,
        account_id: AccountId,
        page: u32,
        limit: u32,
    ) -> LedgerResult<RecordPage> {
        AccountId::validated(account_id.get())?;
        let page = PageRequest::new(page, limit)?;
        Ok(self.store.records_for_account(account_id, page).await?)
    }

    /// The `limit` most recent records of an account, newest first.
    pub async fn recent_records(
        &self,
        account_id: AccountId,
        limit: u32,
    ) -> LedgerResult<Vec<LedgerRecord>> {
        AccountId::validated(account_id.get())?;
        let limit = PageRequest::new(1, limit)?.limit();
        Ok(self.store.recent_records(account_id, limit).await?)
    }

    /// An account's records created between `from` and `to` inclusive,
    /// newest first.
    pub async fn records_between(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<Vec<LedgerRecord>> {
        AccountId::validated(account_id.get())?;
        if to < from {
            return Err(ValidationError::new("to", "end date must not be before start date").into());
        }
        Ok(self.store.records_between(account_id, from, to).await?)
    }

    /// Compare the stored balance with the record trail. Audit helper only:
    /// takes no exclusive locks and never runs inside a mutation.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, account_id: AccountId) -> LedgerResult<Reconciliation> {
        let (stored, derived) = self.store.reconciliation_figures(account_id).await?;
        let reconciliation = Reconciliation::new(account_id, stored, derived);

        if !reconciliation.is_consistent() {
            error!(
                account_id = %account_id,
                stored = %stored,
                derived = %derived,
                "Balance drifted from record trail"
            );
        }
        Ok(reconciliation)
    }
}

fn ensure_active(account_id: AccountId, status: AccountStatus, role: AccountRole) -> LedgerResult<()> {
    if status.can_transact() {
        return Ok(());
    }
    Err(LedgerError::AccountNotActive {
        account_id,
        status,
        role,
    })
}

async fn apply_deposit<U: LedgerUnit>(
    scope: &mut UnitScope<U>,
    account_id: AccountId,
    amount: Amount,
    description: &str,
) -> LedgerResult<LedgerRecord> {
    let status = scope.unit().read_status(account_id).await?;
    ensure_active(account_id, status, AccountRole::Account)?;

    let current = scope.unit().lock_and_read_balance(account_id).await?;
    scope.advance(UnitPhase::LockAcquired);
    scope.advance(UnitPhase::BalanceChecked);

    let new_balance = current + amount.value();
    scope.unit().write_balance(account_id, new_balance).await?;
    scope.advance(UnitPhase::BalancesWritten);

    let record = scope
        .unit()
        .insert_record(NewRecord::deposit(account_id, amount, description))
        .await?;
    scope.advance(UnitPhase::RecordInserted);

    debug!(account_id = %account_id, balance = %new_balance, "Deposit staged");
    Ok(record)
}

async fn apply_withdraw<U: LedgerUnit>(
    scope: &mut UnitScope<U>,
    account_id: AccountId,
    amount: Amount,
    description: &str,
) -> LedgerResult<LedgerRecord> {
    let status = scope.unit().read_status(account_id).await?;
    ensure_active(account_id, status, AccountRole::Account)?;

    let current = scope.unit().lock_and_read_balance(account_id).await?;
    scope.advance(UnitPhase::LockAcquired);

    if current < amount.value() {
        return Err(LedgerError::InsufficientFunds {
            account_id,
            available: current,
            requested: amount.value(),
        });
    }
    scope.advance(UnitPhase::BalanceChecked);

    let new_balance = current - amount.value();
    scope.unit().write_balance(account_id, new_balance).await?;
    scope.advance(UnitPhase::BalancesWritten);

    let record = scope
        .unit()
        .insert_record(NewRecord::withdraw(account_id, amount, description))
        .await?;
    scope.advance(UnitPhase::RecordInserted);

    debug!(account_id = %account_id, balance = %new_balance, "Withdrawal staged");
    Ok(record)
}

async fn apply_transfer<U: LedgerUnit>(
    scope: &mut UnitScope<U>,
    from: AccountId,
    to: AccountId,
    amount: Amount,
    description: &str,
) -> LedgerResult<LedgerRecord> {
    let (first, second) = lock_order(from, to);
    debug!(first = %first, second = %second, "Locking transfer rows");

    let first_balance = scope.unit().lock_and_read_balance(first).await?;
    let second_balance = scope.unit().lock_and_read_balance(second).await?;
    scope.advance(UnitPhase::LockAcquired);

    let (sender_balance, recipient_balance) = if from == first {
        (first_balance, second_balance)
    } else {
        (second_balance, first_balance)
    };

    let sender_status = scope.unit().read_status(from).await?;
    ensure_active(from, sender_status, AccountRole::Sender)?;
    let recipient_status = scope.unit().read_status(to).await?;
    ensure_active(to, recipient_status, AccountRole::Recipient)?;

    if sender_balance < amount.value() {
        return Err(LedgerError::InsufficientFunds {
            account_id: from,
            available: sender_balance,
            requested: amount.value(),
        });
    }
    scope.advance(UnitPhase::BalanceChecked);

    scope
        .unit()
        .write_balance(from, sender_balance - amount.value())
        .await?;
    scope
        .unit()
        .write_balance(to, recipient_balance + amount.value())
        .await?;
    scope.advance(UnitPhase::BalancesWritten);

    let record = scope
        .unit()
        .insert_record(NewRecord::transfer(from, to, amount, description))
        .await?;
    scope.advance(UnitPhase::RecordInserted);

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedgerStore;
    use crate::store::FailPoint;
    use rust_decimal_macros::dec;

    fn amount(v: Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    fn create_test_engine() -> (LedgerEngine<MemoryLedgerStore>, AccountId, AccountId) {
        let store = MemoryLedgerStore::new();
        let x = store.create_account().id;
        let y = store.create_account().id;
        (LedgerEngine::new(store, &LedgerConfig::default()), x, y)
    }

    #[test]
    fn test_lock_order_ignores_direction() {
        let a = AccountId::new(3);
        let b = AccountId::new(8);
        assert_eq!(lock_order(a, b), (a, b));
        assert_eq!(lock_order(b, a), (a, b));
    }

    #[tokio::test]
    async fn test_transfer_locks_ascending_in_both_directions() {
        let (engine, x, y) = create_test_engine();
        engine.deposit(x, amount(dec!(100)), "seed").await.unwrap();
        engine.deposit(y, amount(dec!(100)), "seed").await.unwrap();

        engine.store().enable_lock_trace();
        engine.transfer(y, x, amount(dec!(10)), "back").await.unwrap();
        assert_eq!(engine.store().take_lock_trace(), vec![x, y]);

        engine.transfer(x, y, amount(dec!(10)), "forth").await.unwrap();
        assert_eq!(engine.store().take_lock_trace(), vec![x, y]);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_unit() {
        let (engine, x, _) = create_test_engine();
        engine.store().inject_failure(FailPoint::LockAndRead);

        let err = engine
            .transfer(x, x, amount(dec!(10)), "oops")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let err = engine
            .deposit(AccountId::new(0), amount(dec!(10)), "bad id")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        // no unit was opened, so the armed failure is still pending
        assert_eq!(engine.metrics().snapshot().operations_total, 0);
        let err = engine.deposit(x, amount(dec!(1)), "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InfrastructureFailure);
    }

    #[tokio::test]
    async fn test_engine_policy_caps_amounts() {
        let store = MemoryLedgerStore::new();
        let x = store.create_account().id;
        let config = LedgerConfig {
            max_amount: dec!(100),
            ..LedgerConfig::default()
        };
        let engine = LedgerEngine::new(store, &config);

        let err = engine.deposit(x, amount(dec!(100.01)), "big").await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(engine.get_balance(x).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_inactive_recipient_is_named() {
        let (engine, x, y) = create_test_engine();
        engine.deposit(x, amount(dec!(50)), "seed").await.unwrap();
        engine
            .store()
            .set_status(y, AccountStatus::Closed)
            .await
            .unwrap();

        let err = engine.transfer(x, y, amount(dec!(5)), "pay").await.unwrap_err();
        match err {
            LedgerError::AccountNotActive { account_id, status, role } => {
                assert_eq!(account_id, y);
                assert_eq!(status, AccountStatus::Closed);
                assert_eq!(role, AccountRole::Recipient);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.get_balance(x).await.unwrap(), dec!(50));
    }

    #[tokio::test]
    async fn test_reconcile_and_paging() {
        let (engine, x, y) = create_test_engine();
        engine.deposit(x, amount(dec!(30)), "a").await.unwrap();
        engine.transfer(x, y, amount(dec!(12.50)), "b").await.unwrap();
        engine.withdraw(y, amount(dec!(2.50)), "c").await.unwrap();

        let rx = engine.reconcile(x).await.unwrap();
        assert!(rx.is_consistent());
        assert_eq!(rx.stored, dec!(17.50));

        let ry = engine.reconcile(y).await.unwrap();
        assert_eq!(ry.derived, dec!(10));

        let page = engine.account_records(y, 1, 10).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert!(engine.account_records(y, 0, 10).await.is_err());

        let first = engine.get_record(page.records[1].id).await.unwrap();
        assert_eq!(first.record_type, RecordType::Transfer);
        assert!(matches!(
            engine.get_record(RecordId::new(999)).await,
            Err(LedgerError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_and_ranged_history() {
        let (engine, x, y) = create_test_engine();
        let before = Utc::now();
        engine.deposit(x, amount(dec!(40)), "a").await.unwrap();
        engine.transfer(x, y, amount(dec!(15)), "b").await.unwrap();
        engine.withdraw(x, amount(dec!(5)), "c").await.unwrap();
        let after = Utc::now();

        let recent = engine.recent_records(x, 2).await.unwrap();
        let kinds: Vec<RecordType> = recent.iter().map(|r| r.record_type).collect();
        assert_eq!(kinds, vec![RecordType::Withdraw, RecordType::Transfer]);
        assert!(engine.recent_records(x, 0).await.is_err());
        assert!(engine.recent_records(x, 101).await.is_err());

        let ranged = engine.records_between(x, before, after).await.unwrap();
        assert_eq!(ranged.len(), 3);
        assert_eq!(ranged[2].record_type, RecordType::Deposit);
        assert_eq!(engine.records_between(y, before, after).await.unwrap().len(), 1);

        let err = engine.records_between(x, after, before).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_abandoned_operation_leaves_no_active_count() {
        let (engine, x, _) = create_test_engine();

        let mut blocker = engine.store().begin_unit().await.unwrap();
        blocker.lock_and_read_balance(x).await.unwrap();

        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            engine.deposit(x, amount(dec!(10)), "abandoned"),
        )
        .await;
        assert!(waited.is_err());
        blocker.discard().await.unwrap();

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.operations_total, 1);
        assert_eq!(snapshot.operations_active, 0);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(engine.get_balance(x).await.unwrap(), Decimal::ZERO);

        // the row lock held by the abandoned unit was released
        engine.deposit(x, amount(dec!(10)), "retry").await.unwrap();
        assert_eq!(engine.metrics().snapshot().operations_active, 0);
    }
}
