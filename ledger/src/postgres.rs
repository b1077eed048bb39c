//! PostgreSQL-backed store.
//!
//! A unit is one database transaction. Row locks are `SELECT ... FOR UPDATE`
//! and last until commit or rollback; dropping a [`PgUnit`] rolls back.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, info, instrument};

use strongbox_common::{AccountId, PageRequest, RecordId};

use crate::account::{Account, AccountStatus};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::record::{LedgerRecord, NewRecord, RecordPage, RecordStatus, RecordType};
use crate::store::{LedgerReader, LedgerStore, LedgerUnit};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);

const RECORD_COLUMNS: &str =
    "id, from_account_id, to_account_id, amount, type, description, status, created_at";

/// Credits minus debits of completed records for account `$1`.
const DERIVED_BALANCE_SQL: &str = "\
    COALESCE((SELECT SUM(amount) FROM transactions \
              WHERE to_account_id = $1 AND status = 'completed'), 0) \
  - COALESCE((SELECT SUM(amount) FROM transactions \
              WHERE from_account_id = $1 AND status = 'completed'), 0)";

#[derive(FromRow)]
struct AccountRow {
    id: i64,
    balance: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId::new(row.id),
            balance: row.balance,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RecordRow {
    id: i64,
    from_account_id: Option<i64>,
    to_account_id: Option<i64>,
    amount: Decimal,
    #[sqlx(rename = "type")]
    record_type: String,
    description: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for LedgerRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(LedgerRecord {
            id: RecordId::new(row.id),
            from_account_id: row.from_account_id.map(AccountId::new),
            to_account_id: row.to_account_id.map(AccountId::new),
            amount: row.amount,
            record_type: row
                .record_type
                .parse::<RecordType>()
                .map_err(StoreError::Corrupt)?,
            description: row.description.unwrap_or_default(),
            status: row
                .status
                .parse::<RecordStatus>()
                .map_err(StoreError::Corrupt)?,
            created_at: row.created_at,
        })
    }
}

/// Store over a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Open a pool sized from `config` and check it answers.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(config.max_lifetime)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        store.health().await?;
        info!(
            max_connections = config.max_connections,
            "Database connection established"
        );
        Ok(store)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Schema migrations applied");
        Ok(())
    }

    /// Round-trip a trivial query within a short bound.
    pub async fn health(&self) -> Result<(), StoreError> {
        let ping = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(HEALTH_TIMEOUT, ping).await {
            Ok(result) => result.map(drop).map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout("health check".to_string())),
        }
    }

    /// Create an account at zero balance with active status.
    #[instrument(skip(self))]
    pub async fn create_account(&self) -> Result<Account, StoreError> {
        let row: AccountRow = sqlx::query_as(
            "INSERT INTO accounts (balance, status) VALUES (0, 'active') \
             RETURNING id, balance, status, created_at, updated_at",
        )
        .fetch_one(&self.pool)
        .await?;

        let account = Account::try_from(row)?;
        info!(account_id = %account.id, "Account created");
        Ok(account)
    }

    /// Change an account's status. Waits for any unit holding the row.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        account: AccountId,
        status: AccountStatus,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE accounts SET status = $1, updated_at = NOW() WHERE id = $2")
                .bind(status.as_str())
                .bind(account.get())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(account));
        }
        info!(account_id = %account, status = %status, "Account status changed");
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

/// Open unit against a [`PgLedgerStore`].
pub struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Unit = PgUnit;

    async fn begin_unit(&self) -> Result<PgUnit, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgUnit { tx })
    }
}

#[async_trait]
impl LedgerUnit for PgUnit {
    async fn lock_and_read_balance(&mut self, account: AccountId) -> Result<Decimal, StoreError> {
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account.get())
                .fetch_optional(&mut *self.tx)
                .await?;

        debug!(account_id = %account, "Row lock acquired");
        balance.ok_or(StoreError::NotFound(account))
    }

    async fn write_balance(
        &mut self,
        account: AccountId,
        balance: Decimal,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE accounts SET balance = $1, updated_at = NOW() WHERE id = $2")
                .bind(balance)
                .bind(account.get())
                .execute(&mut *self.tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(account));
        }
        Ok(())
    }

    async fn read_status(&mut self, account: AccountId) -> Result<AccountStatus, StoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM accounts WHERE id = $1")
            .bind(account.get())
            .fetch_optional(&mut *self.tx)
            .await?;

        status
            .ok_or(StoreError::NotFound(account))?
            .parse()
            .map_err(StoreError::Corrupt)
    }

    async fn insert_record(&mut self, record: NewRecord) -> Result<LedgerRecord, StoreError> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO transactions \
             (from_account_id, to_account_id, amount, type, description, status) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, created_at",
        )
        .bind(record.from_account_id.map(|a| a.get()))
        .bind(record.to_account_id.map(|a| a.get()))
        .bind(record.amount)
        .bind(record.record_type.as_str())
        .bind(&record.description)
        .bind(RecordStatus::Completed.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(record.completed(RecordId::new(id), created_at))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn discard(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerReader for PgLedgerStore {
    async fn account(&self, account: AccountId) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT id, balance, status, created_at, updated_at FROM accounts WHERE id = $1",
        )
        .bind(account.get())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::NotFound(account))?.try_into()
    }

    async fn record(&self, id: RecordId) -> Result<LedgerRecord, StoreError> {
        let row: Option<RecordRow> =
            sqlx::query_as(&format!("SELECT {RECORD_COLUMNS} FROM transactions WHERE id = $1"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;

        row.ok_or(StoreError::RecordNotFound(id))?.try_into()
    }

    async fn records_for_account(
        &self,
        account: AccountId,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError> {
        self.account(account).await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions \
             WHERE from_account_id = $1 OR to_account_id = $1",
        )
        .bind(account.get())
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions \
             WHERE from_account_id = $1 OR to_account_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(account.get())
        .bind(i64::from(page.limit()))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(LedgerRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RecordPage::new(records, page, total.max(0) as u64))
    }

    async fn recent_records(
        &self,
        account: AccountId,
        limit: u32,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        self.account(account).await?;

        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions \
             WHERE from_account_id = $1 OR to_account_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        ))
        .bind(account.get())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerRecord::try_from).collect()
    }

    async fn records_between(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        self.account(account).await?;

        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM transactions \
             WHERE (from_account_id = $1 OR to_account_id = $1) \
             AND created_at >= $2 AND created_at <= $3 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(account.get())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerRecord::try_from).collect()
    }

    async fn derived_balance(&self, account: AccountId) -> Result<Decimal, StoreError> {
        self.reconciliation_figures(account)
            .await
            .map(|(_, derived)| derived)
    }

    async fn reconciliation_figures(
        &self,
        account: AccountId,
    ) -> Result<(Decimal, Decimal), StoreError> {
        let figures: Option<(Decimal, Decimal)> = sqlx::query_as(&format!(
            "SELECT balance, {DERIVED_BALANCE_SQL} FROM accounts WHERE id = $1"
        ))
        .bind(account.get())
        .fetch_optional(&self.pool)
        .await?;

        figures.ok_or(StoreError::NotFound(account))
    }
}
