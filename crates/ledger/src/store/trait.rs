use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use remit_core::{Account, AccountId, Money, NewAccount};

/// Storage operation error.
///
/// These are **infrastructure errors** (locking, connectivity, decoding) as opposed
/// to ledger validation failures. The engine wraps them in `LedgerError::Storage`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Waiting for a row lock exceeded the configured bound.
    #[error("lock wait timed out: {0}")]
    LockTimeout(String),

    /// The backend aborted the transaction to break a lock cycle.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// A row constraint rejected the write (e.g. negative balance, bad currency).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A value exceeded what the backend column can hold.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// A stored row could not be mapped back to an `Account`.
    #[error("failed to decode row: {0}")]
    Decode(String),

    /// A mutation touched a different number of rows than the protocol requires.
    #[error("expected {expected} row(s) updated, storage reported {actual}")]
    RowCount { expected: u64, actual: u64 },

    /// Any other backend or connection failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One balance write inside a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account_id: AccountId,
    pub balance: Money,
}

impl BalanceUpdate {
    pub fn new(account_id: AccountId, balance: Money) -> Self {
        Self {
            account_id,
            balance,
        }
    }
}

/// An open storage transaction with auto-commit disabled.
///
/// Row locks taken through [`StoreTransaction::lock_for_update`] are held until
/// the transaction ends. Dropping a transaction without committing rolls it back
/// and releases its locks.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Take the row's exclusive lock ("select ... for update") and read it.
    ///
    /// Blocks while another transaction holds the lock, up to the backend's lock
    /// timeout. Returns `None` when no such row exists.
    async fn lock_for_update(&mut self, account_id: AccountId)
        -> Result<Option<Account>, StoreError>;

    /// Write a new balance; returns the number of rows affected.
    async fn update_balance(
        &mut self,
        account_id: AccountId,
        balance: Money,
    ) -> Result<u64, StoreError>;

    /// Submit several balance writes as one batch; returns the summed row count.
    ///
    /// Atomicity comes from the enclosing transaction: either the commit
    /// publishes every write or none of them.
    async fn update_balances(&mut self, updates: &[BalanceUpdate]) -> Result<u64, StoreError> {
        let mut rows = 0;
        for update in updates {
            rows += self.update_balance(update.account_id, update.balance).await?;
        }
        Ok(rows)
    }

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Transaction factory.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: StoreTransaction + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// Plain account bookkeeping: creation, non-locking reads, deletion.
///
/// None of these take part in balance mutation; reads observe committed state
/// only and never wait on row locks held by the ledger.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new row; storage assigns the id.
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError>;

    /// All accounts, ordered by id.
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Returns the number of rows removed (0 or 1).
    async fn delete_account(&self, account_id: AccountId) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    type Tx = S::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        (**self).begin().await
    }
}

#[async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        (**self).create_account(account).await
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        (**self).get_account(account_id).await
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        (**self).list_accounts().await
    }

    async fn delete_account(&self, account_id: AccountId) -> Result<u64, StoreError> {
        (**self).delete_account(account_id).await
    }
}
