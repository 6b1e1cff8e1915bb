//! In-memory backend with real row locks.
//!
//! Two structures, two jobs:
//! - `locks` holds one async mutex per row and gives `FOR UPDATE` semantics;
//! - `committed` is the single committed table. Readers take its read guard and
//!   commit publishes every staged balance under one write guard, so a reader
//!   sees either none or all of a transaction's writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use remit_core::{Account, AccountId, Money, NewAccount};

use super::r#trait::{AccountStore, LedgerStore, StoreError, StoreTransaction};

type RowLock = Arc<Mutex<()>>;

#[derive(Debug)]
struct Inner {
    locks: RwLock<HashMap<AccountId, RowLock>>,
    committed: RwLock<BTreeMap<AccountId, Account>>,
    next_id: AtomicI64,
    lock_timeout: Option<Duration>,
}

impl Inner {
    fn row_lock(&self, account_id: AccountId) -> Result<Option<RowLock>, StoreError> {
        let locks = self.locks.read().map_err(|_| poisoned())?;
        Ok(locks.get(&account_id).cloned())
    }

    fn snapshot(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let committed = self.committed.read().map_err(|_| poisoned())?;
        Ok(committed.get(&account_id).cloned())
    }

    async fn acquire(
        &self,
        account_id: AccountId,
        lock: RowLock,
    ) -> Result<OwnedMutexGuard<()>, StoreError> {
        match self.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, lock.lock_owned())
                .await
                .map_err(|_| {
                    StoreError::LockTimeout(format!(
                        "account {account_id} still locked after {limit:?}"
                    ))
                }),
            None => Ok(lock.lock_owned().await),
        }
    }
}

/// In-memory account store with genuine row locking.
///
/// Intended for tests/dev. Each row carries its own async mutex, so concurrent
/// transactions on the same account serialize exactly like `SELECT ... FOR UPDATE`
/// while transactions on other accounts proceed. Writes are staged per
/// transaction and become visible to readers atomically on commit.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    inner: Arc<Inner>,
}

impl InMemoryLedgerStore {
    /// Unbounded lock waits.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Lock waits longer than `limit` fail with `StoreError::LockTimeout`.
    pub fn with_lock_timeout(limit: Duration) -> Self {
        Self::build(Some(limit))
    }

    fn build(lock_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                locks: RwLock::new(HashMap::new()),
                committed: RwLock::new(BTreeMap::new()),
                next_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A row lock held by an open transaction, with the row as it was when locked.
#[derive(Debug)]
struct HeldRow {
    account: Account,
    _guard: OwnedMutexGuard<()>,
}

/// Transaction over [`InMemoryLedgerStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    inner: Arc<Inner>,
    held: BTreeMap<AccountId, HeldRow>,
    staged: BTreeMap<AccountId, Money>,
}

#[async_trait]
impl StoreTransaction for InMemoryTx {
    async fn lock_for_update(
        &mut self,
        account_id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        if let Some(held) = self.held.get(&account_id) {
            let balance = self
                .staged
                .get(&account_id)
                .copied()
                .unwrap_or(held.account.balance);
            return Ok(Some(held.account.with_balance(balance)));
        }

        let Some(lock) = self.inner.row_lock(account_id)? else {
            return Ok(None);
        };
        let guard = self.inner.acquire(account_id, lock).await?;

        // The row may have been deleted while we waited for its lock.
        let Some(account) = self.inner.snapshot(account_id)? else {
            return Ok(None);
        };

        tracing::trace!(%account_id, "row locked");
        self.held.insert(
            account_id,
            HeldRow {
                account: account.clone(),
                _guard: guard,
            },
        );
        Ok(Some(account))
    }

    async fn update_balance(
        &mut self,
        account_id: AccountId,
        balance: Money,
    ) -> Result<u64, StoreError> {
        // An UPDATE takes the row lock implicitly when the caller has not.
        if !self.held.contains_key(&account_id) && self.lock_for_update(account_id).await?.is_none()
        {
            return Ok(0);
        }
        if !balance.is_non_negative() {
            return Err(StoreError::Constraint(format!(
                "balance of account {account_id} must not be negative, got {balance}"
            )));
        }
        self.staged.insert(account_id, balance);
        Ok(1)
    }

    async fn commit(self) -> Result<(), StoreError> {
        {
            let mut committed = self.inner.committed.write().map_err(|_| poisoned())?;
            for (account_id, balance) in &self.staged {
                // Held rows cannot be deleted: deletion waits for the row lock.
                if let Some(account) = committed.get_mut(account_id) {
                    account.balance = *balance;
                }
            }
        }
        tracing::trace!(rows = self.staged.len(), "in-memory transaction committed");
        // Dropping `self` releases every row lock.
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        tracing::trace!(rows = self.staged.len(), "in-memory transaction rolled back");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(InMemoryTx {
            inner: Arc::clone(&self.inner),
            held: BTreeMap::new(),
            staged: BTreeMap::new(),
        })
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        account
            .validate()
            .map_err(|e| StoreError::Constraint(e.to_string()))?;

        let id = AccountId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let created = Account {
            id,
            user_name: account.user_name,
            balance: account.balance,
            currency: account.currency,
        };

        // Lock first, so a row visible to readers always has a lock to take.
        self.inner
            .locks
            .write()
            .map_err(|_| poisoned())?
            .insert(id, Arc::new(Mutex::new(())));
        self.inner
            .committed
            .write()
            .map_err(|_| poisoned())?
            .insert(id, created.clone());
        Ok(created)
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        self.inner.snapshot(account_id)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let committed = self.inner.committed.read().map_err(|_| poisoned())?;
        Ok(committed.values().cloned().collect())
    }

    async fn delete_account(&self, account_id: AccountId) -> Result<u64, StoreError> {
        let Some(lock) = self.inner.row_lock(account_id)? else {
            return Ok(0);
        };

        // Deleting waits for in-flight ledger transactions on the row.
        let _guard = self.inner.acquire(account_id, lock).await?;
        let existed = self
            .inner
            .committed
            .write()
            .map_err(|_| poisoned())?
            .remove(&account_id)
            .is_some();
        self.inner
            .locks
            .write()
            .map_err(|_| poisoned())?
            .remove(&account_id);
        Ok(u64::from(existed))
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory row table lock poisoned".to_string())
}
