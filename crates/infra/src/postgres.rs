//! Postgres-backed ledger store.
//!
//! Row locking is delegated to the database: `lock_for_update` issues
//! `SELECT ... FOR UPDATE` inside an open transaction, and the lock is held until
//! that transaction commits or rolls back. Dropping a [`PgLedgerTx`] without
//! finishing it returns the connection to the pool, which rolls the transaction
//! back.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | `StoreError` | Scenario |
//! |------------|----------|--------------|----------|
//! | Database | `55P03` | `LockTimeout` | `lock_timeout` elapsed waiting for a row lock |
//! | Database | `40P01` | `Deadlock` | backend broke a lock cycle |
//! | Database | `22003` | `OutOfRange` | balance wider than `NUMERIC(19, 4)` |
//! | Database | `23xxx` | `Constraint` | negative balance, malformed currency, ... |
//! | Database | other | `Backend` | any other server-side failure |
//! | ColumnDecode / Decode / ColumnNotFound | n/a | `Decode` | row shape does not match `Account` |
//! | everything else | n/a | `Backend` | pool closed, network, TLS, ... |

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use remit_core::{Account, AccountId, CurrencyCode, Money, NewAccount, normalize};
use remit_ledger::{AccountStore, LedgerStore, StoreError, StoreTransaction};

use crate::config::LedgerConfig;

const SET_LOCK_TIMEOUT: &str = "SELECT set_config('lock_timeout', $1, true)";

const SELECT_FOR_UPDATE: &str = r#"
    SELECT account_id, user_name, balance, currency_code
    FROM accounts
    WHERE account_id = $1
    FOR UPDATE
"#;

const SELECT_ONE: &str = r#"
    SELECT account_id, user_name, balance, currency_code
    FROM accounts
    WHERE account_id = $1
"#;

const SELECT_ALL: &str = r#"
    SELECT account_id, user_name, balance, currency_code
    FROM accounts
    ORDER BY account_id ASC
"#;

const UPDATE_BALANCE: &str = "UPDATE accounts SET balance = $1 WHERE account_id = $2";

const INSERT_ACCOUNT: &str = r#"
    INSERT INTO accounts (user_name, balance, currency_code)
    VALUES ($1, $2, $3)
    RETURNING account_id, user_name, balance, currency_code
"#;

const DELETE_ACCOUNT: &str = "DELETE FROM accounts WHERE account_id = $1";

/// Ledger store over a shared `sqlx` connection pool.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgLedgerStore {
    /// Wrap an existing pool. Lock waits are unbounded until
    /// [`with_lock_timeout`](Self::with_lock_timeout) is called.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Open a pool sized and bounded by `config`.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &LedgerConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool).with_lock_timeout(config.lock_timeout))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// An open Postgres transaction.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Some(limit) = self.lock_timeout {
            // Transaction-local: the setting ends with the transaction.
            sqlx::query(SET_LOCK_TIMEOUT)
                .bind(format!("{}ms", limit.as_millis()))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        }

        Ok(PgLedgerTx { tx })
    }
}

#[async_trait]
impl StoreTransaction for PgLedgerTx {
    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn lock_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(SELECT_FOR_UPDATE)
            .bind(account_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_for_update", e))?;

        row.map(|row| decode_account(&row)).transpose()
    }

    #[instrument(skip(self), fields(account_id = %account_id, balance = %balance), err)]
    async fn update_balance(
        &mut self,
        account_id: AccountId,
        balance: Money,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(UPDATE_BALANCE)
            .bind(balance.amount())
            .bind(account_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_balance", e))?;
        Ok(result.rows_affected())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

#[async_trait]
impl AccountStore for PgLedgerStore {
    #[instrument(skip(self, account), fields(currency = %account.currency), err)]
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        account
            .validate()
            .map_err(|e| StoreError::Constraint(e.to_string()))?;

        let row = sqlx::query(INSERT_ACCOUNT)
            .bind(&account.user_name)
            .bind(account.balance.amount())
            .bind(account.currency.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_account", e))?;

        let created = decode_account(&row)?;
        debug!(account_id = %created.id, "account created");
        Ok(created)
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(SELECT_ONE)
            .bind(account_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?;

        row.map(|row| decode_account(&row)).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(SELECT_ALL)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_accounts", e))?;

        rows.iter().map(decode_account).collect()
    }

    #[instrument(skip(self), fields(account_id = %account_id), err)]
    async fn delete_account(&self, account_id: AccountId) -> Result<u64, StoreError> {
        let result = sqlx::query(DELETE_ACCOUNT)
            .bind(account_id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;
        Ok(result.rows_affected())
    }
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    account_id: i64,
    user_name: String,
    balance: Decimal,
    currency_code: String,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            account_id: row.try_get("account_id")?,
            user_name: row.try_get("user_name")?,
            balance: row.try_get("balance")?,
            currency_code: row.try_get("currency_code")?,
        })
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let currency = CurrencyCode::new(row.currency_code.trim())
            .map_err(|e| StoreError::Decode(format!("account {}: {e}", row.account_id)))?;
        Ok(Account {
            id: AccountId::new(row.account_id),
            user_name: row.user_name,
            balance: normalize(row.balance),
            currency,
        })
    }
}

fn decode_account(row: &PgRow) -> Result<Account, StoreError> {
    AccountRow::from_row(row)
        .map_err(|e| StoreError::Decode(format!("failed to deserialize account row: {e}")))?
        .try_into()
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            classify_sqlstate(db_err.code().as_deref(), msg)
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode(format!("{} in {}", err, operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("timed out acquiring a connection in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn classify_sqlstate(code: Option<&str>, msg: String) -> StoreError {
    match code {
        // lock_not_available
        Some("55P03") => StoreError::LockTimeout(msg),
        // deadlock_detected
        Some("40P01") => StoreError::Deadlock(msg),
        // numeric_value_out_of_range
        Some("22003") => StoreError::OutOfRange(msg),
        // integrity_constraint_violation class
        Some(code) if code.starts_with("23") => StoreError::Constraint(msg),
        _ => StoreError::Backend(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sqlstate_classes() {
        let msg = || "boom".to_string();
        assert!(matches!(
            classify_sqlstate(Some("55P03"), msg()),
            StoreError::LockTimeout(_)
        ));
        assert!(matches!(
            classify_sqlstate(Some("40P01"), msg()),
            StoreError::Deadlock(_)
        ));
        for code in ["23505", "23514", "23502"] {
            assert!(matches!(
                classify_sqlstate(Some(code), msg()),
                StoreError::Constraint(_)
            ));
        }
        assert!(matches!(
            classify_sqlstate(Some("22003"), msg()),
            StoreError::OutOfRange(_)
        ));
        assert!(matches!(
            classify_sqlstate(Some("40001"), msg()),
            StoreError::Backend(_)
        ));
        assert!(matches!(classify_sqlstate(None, msg()), StoreError::Backend(_)));
    }

    #[test]
    fn pool_errors_are_backend_failures() {
        let err = map_sqlx_error("begin_transaction", sqlx::Error::PoolClosed);
        assert_eq!(
            err,
            StoreError::Backend("connection pool closed in begin_transaction".to_string())
        );
    }

    #[test]
    fn column_errors_are_decode_failures() {
        let err = map_sqlx_error("lock_for_update", sqlx::Error::ColumnNotFound("balance".into()));
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn row_conversion_normalizes_balance() {
        let account = Account::try_from(AccountRow {
            account_id: 7,
            user_name: "ada".to_string(),
            balance: dec!(12.5),
            currency_code: "EUR".to_string(),
        })
        .unwrap();
        assert_eq!(account.id, AccountId::new(7));
        assert_eq!(account.balance.to_string(), "12.5000");
        assert_eq!(account.currency.as_str(), "EUR");
    }

    #[test]
    fn malformed_currency_is_a_decode_error() {
        let err = Account::try_from(AccountRow {
            account_id: 7,
            user_name: "ada".to_string(),
            balance: dec!(1),
            currency_code: "eu".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
