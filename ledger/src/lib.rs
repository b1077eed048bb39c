//! Strongbox Ledger Engine
//!
//! Atomic deposit, withdraw and transfer operations over a shared account
//! store. Every operation runs inside one atomic unit, takes exclusive row
//! locks in ascending account-id order and appends exactly one immutable
//! record when it commits.

pub mod account;
pub mod record;
pub mod balance;
pub mod error;
pub mod store;
pub mod unit;
pub mod engine;
pub mod memory;
pub mod postgres;
pub mod config;
pub mod metrics;

pub use account::{Account, AccountStatus};
pub use record::{LedgerRecord, NewRecord, RecordPage, RecordStatus, RecordType};
pub use balance::Reconciliation;
pub use error::{AccountRole, ErrorKind, LedgerError, LedgerResult, StoreError};
pub use store::{FailPoint, LedgerReader, LedgerStore, LedgerUnit};
pub use unit::{UnitPhase, UnitScope};
pub use engine::{lock_order, LedgerEngine};
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use config::{DatabaseConfig, LedgerConfig};
pub use metrics::{LedgerMetrics, MetricsSnapshot};
