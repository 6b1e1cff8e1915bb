//! Balance-mutation engine.
//!
//! Every public operation is one storage transaction that follows the same
//! protocol:
//!
//! ```text
//! begin
//!   ↓
//! lock the row(s) it will mutate (ascending account id)
//!   ↓
//! validate existence, currency, sufficient funds
//!   ↓
//! write the new balance(s) as one batch
//!   ↓
//! commit          (any failure above → rollback, error to the caller)
//! ```
//!
//! The engine holds no state between calls and never retries. Correctness under
//! concurrency comes entirely from the row locks: two calls touching the same
//! account serialize on its lock, calls on different accounts run independently,
//! and multi-row locks are always taken in ascending id order so opposite-direction
//! transfers cannot deadlock.

use rust_decimal::Decimal;
use tracing::{debug, error, instrument, warn};

use remit_core::{Account, AccountId, Money, normalize};

use crate::error::{ErrorKind, LedgerError, LedgerResult};
use crate::phase::TxPhase;
use crate::request::TransferRequest;
use crate::store::{BalanceUpdate, LedgerStore, StoreError, StoreTransaction};

/// Rows a successful single-account adjustment updates.
const ADJUST_ROWS: u64 = 1;
/// Rows a successful transfer updates.
const TRANSFER_ROWS: u64 = 2;

/// Ledger engine over an injected store handle.
///
/// Cheap to clone when the store is (e.g. `Arc<S>` or the in-memory store), so one
/// engine can be shared by many request handlers.
#[derive(Debug, Clone)]
pub struct LedgerEngine<S> {
    store: S,
}

impl<S> LedgerEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl<S> LedgerEngine<S>
where
    S: LedgerStore,
{
    /// Apply a signed `delta` to one account.
    ///
    /// Returns the number of rows updated; `Ok(1)` is the only success value.
    /// A delta of zero on an existing account still locks, validates and
    /// rewrites the (unchanged) balance.
    #[instrument(skip_all, fields(account_id = %account_id, delta = %delta))]
    pub async fn adjust_balance(&self, account_id: AccountId, delta: Decimal) -> LedgerResult<u64> {
        let delta = normalize(delta);
        let mut unit = Unit::begin(&self.store).await?;

        match apply_adjustment(&mut unit, account_id, delta).await {
            Ok(new_balance) => {
                unit.commit().await?;
                debug!(%account_id, %new_balance, "balance adjusted");
                Ok(ADJUST_ROWS)
            }
            Err(err) => Err(unit.abort(err).await),
        }
    }

    /// Credit a strictly positive `amount`.
    pub async fn deposit(&self, account_id: AccountId, amount: Decimal) -> LedgerResult<u64> {
        let amount = positive(amount)?;
        self.adjust_balance(account_id, amount.amount()).await
    }

    /// Debit a strictly positive `amount`; fails with `InsufficientFunds` rather
    /// than overdrawing.
    pub async fn withdraw(&self, account_id: AccountId, amount: Decimal) -> LedgerResult<u64> {
        let amount = positive(amount)?;
        self.adjust_balance(account_id, (-amount).amount()).await
    }

    /// Move `request.amount` between two accounts atomically.
    ///
    /// Returns `Ok(2)` on success; both balance updates are committed together
    /// or not at all.
    #[instrument(
        skip_all,
        fields(
            source = %request.source,
            destination = %request.destination,
            amount = %request.amount,
            currency = %request.currency_code
        )
    )]
    pub async fn transfer(&self, request: &TransferRequest) -> LedgerResult<u64> {
        if let Err(err) = request.validate() {
            warn!(error = %err, "transfer request rejected");
            return Err(err);
        }

        let mut unit = Unit::begin(&self.store).await?;

        match apply_transfer(&mut unit, request).await {
            Ok(rows) => {
                unit.commit().await?;
                debug!(rows, "transfer committed");
                Ok(rows)
            }
            Err(err) => Err(unit.abort(err).await),
        }
    }
}

async fn apply_adjustment<T: StoreTransaction>(
    unit: &mut Unit<T>,
    account_id: AccountId,
    delta: Money,
) -> LedgerResult<Money> {
    unit.enter(TxPhase::Locking);
    let account = unit.lock(account_id).await?;

    unit.enter(TxPhase::Validating);
    let requested = -delta;
    if delta.is_negative() && account.balance < requested {
        return Err(LedgerError::InsufficientFunds {
            account_id,
            balance: account.balance,
            requested,
        });
    }
    let new_balance = account
        .balance
        .checked_add(delta)
        .ok_or(LedgerError::AmountOverflow(account_id))?;

    unit.enter(TxPhase::Mutating);
    let rows = unit
        .write(&[BalanceUpdate::new(account_id, new_balance)])
        .await
        .map_err(|e| overflow_on_write(e, account_id))?;
    expect_rows(ADJUST_ROWS, rows)?;
    Ok(new_balance)
}

async fn apply_transfer<T: StoreTransaction>(
    unit: &mut Unit<T>,
    request: &TransferRequest,
) -> LedgerResult<u64> {
    let amount = request.amount;

    unit.enter(TxPhase::Locking);
    let (source, destination) = lock_pair(unit, request.source, request.destination).await?;

    unit.enter(TxPhase::Validating);
    if source.currency.as_str() != request.currency_code {
        return Err(LedgerError::CurrencyMismatch {
            expected: source.currency,
            found: request.currency_code.clone(),
        });
    }
    if destination.currency != source.currency {
        return Err(LedgerError::CurrencyMismatch {
            expected: source.currency,
            found: destination.currency.to_string(),
        });
    }

    if source.balance < amount {
        return Err(LedgerError::InsufficientFunds {
            account_id: source.id,
            balance: source.balance,
            requested: amount,
        });
    }
    let remainder = source
        .balance
        .checked_sub(amount)
        .ok_or(LedgerError::AmountOverflow(source.id))?;
    let credited = destination
        .balance
        .checked_add(amount)
        .ok_or(LedgerError::AmountOverflow(destination.id))?;

    unit.enter(TxPhase::Mutating);
    let rows = unit
        .write(&[
            BalanceUpdate::new(source.id, remainder),
            BalanceUpdate::new(destination.id, credited),
        ])
        .await
        .map_err(|e| overflow_on_write(e, destination.id))?;
    expect_rows(TRANSFER_ROWS, rows)?;
    Ok(rows)
}

/// Lock both rows in ascending id order, then hand them back by role.
async fn lock_pair<T: StoreTransaction>(
    unit: &mut Unit<T>,
    source: AccountId,
    destination: AccountId,
) -> LedgerResult<(Account, Account)> {
    let (first, second) = if source <= destination {
        (source, destination)
    } else {
        (destination, source)
    };

    let first_row = unit.lock(first).await?;
    let second_row = unit.lock(second).await?;

    if first == source {
        Ok((first_row, second_row))
    } else {
        Ok((second_row, first_row))
    }
}

fn positive(amount: Decimal) -> LedgerResult<Money> {
    let amount = normalize(amount);
    if !amount.is_positive() {
        warn!(%amount, "non-positive amount rejected");
        return Err(LedgerError::InvalidAmount(amount.amount()));
    }
    Ok(amount)
}

/// Storage rejecting a value as out of range means the credited balance
/// outgrew the column; only `credited` can have grown.
fn overflow_on_write(err: LedgerError, credited: AccountId) -> LedgerError {
    match err {
        LedgerError::Storage(StoreError::OutOfRange(_)) => LedgerError::AmountOverflow(credited),
        other => other,
    }
}

fn expect_rows(expected: u64, actual: u64) -> LedgerResult<()> {
    if expected != actual {
        return Err(StoreError::RowCount { expected, actual }.into());
    }
    Ok(())
}

/// An open storage transaction plus the phase it has reached.
///
/// Ends exactly once, through `commit` or `abort`.
struct Unit<T> {
    tx: T,
    phase: TxPhase,
}

impl<T: StoreTransaction> Unit<T> {
    async fn begin<S>(store: &S) -> LedgerResult<Self>
    where
        S: LedgerStore<Tx = T>,
    {
        let tx = store.begin().await.map_err(|e| {
            error!(error = %e, "failed to open transaction");
            LedgerError::Storage(e)
        })?;
        Ok(Self {
            tx,
            phase: TxPhase::Started,
        })
    }

    fn enter(&mut self, next: TxPhase) {
        self.phase.advance(next);
    }

    async fn lock(&mut self, account_id: AccountId) -> LedgerResult<Account> {
        self.tx
            .lock_for_update(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    async fn write(&mut self, updates: &[BalanceUpdate]) -> LedgerResult<u64> {
        Ok(self.tx.update_balances(updates).await?)
    }

    async fn commit(mut self) -> LedgerResult<()> {
        match self.tx.commit().await {
            Ok(()) => {
                self.phase.advance(TxPhase::Committed);
                Ok(())
            }
            Err(e) => {
                // A failed commit leaves nothing applied; the backend discards the transaction.
                self.phase.advance(TxPhase::RolledBack);
                error!(error = %e, "commit failed");
                Err(LedgerError::Storage(e))
            }
        }
    }

    /// Roll back after `cause` and return the error the caller should see.
    async fn abort(mut self, cause: LedgerError) -> LedgerError {
        let failed_in = self.phase;
        self.phase.advance(TxPhase::RolledBack);

        match self.tx.rollback().await {
            Ok(()) => {
                match cause.kind() {
                    ErrorKind::Storage => {
                        error!(phase = %failed_in, error = %cause, "transaction rolled back")
                    }
                    _ => warn!(phase = %failed_in, error = %cause, "transaction rolled back"),
                }
                cause
            }
            Err(source) => {
                error!(
                    phase = %failed_in,
                    error = %cause,
                    rollback_error = %source,
                    "rollback failed; lock state is unknown"
                );
                LedgerError::RollbackFailed {
                    phase: failed_in,
                    cause: Box::new(cause),
                    source,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountStore, InMemoryLedgerStore};
    use proptest::prelude::*;
    use remit_core::{CurrencyCode, NewAccount};
    use rust_decimal_macros::dec;

    async fn open(balance: Decimal, currency: &str, store: &InMemoryLedgerStore) -> AccountId {
        store
            .create_account(NewAccount::new(
                "test",
                normalize(balance),
                CurrencyCode::new(currency).unwrap(),
            ))
            .await
            .unwrap()
            .id
    }

    async fn balance(store: &InMemoryLedgerStore, id: AccountId) -> Money {
        store.get_account(id).await.unwrap().unwrap().balance
    }

    fn engine() -> LedgerEngine<InMemoryLedgerStore> {
        LedgerEngine::new(InMemoryLedgerStore::new())
    }

    #[tokio::test]
    async fn deposit_then_withdraw_round_trips() {
        let engine = engine();
        let id = open(dec!(100.0000), "USD", engine.store()).await;

        assert_eq!(engine.adjust_balance(id, dec!(50.0000)).await, Ok(1));
        assert_eq!(balance(engine.store(), id).await.to_string(), "150.0000");

        assert_eq!(engine.adjust_balance(id, dec!(-50.0000)).await, Ok(1));
        assert_eq!(balance(engine.store(), id).await.to_string(), "100.0000");
    }

    #[tokio::test]
    async fn overdraft_fails_and_leaves_balance() {
        let engine = engine();
        let id = open(dec!(100), "USD", engine.store()).await;

        let err = engine.adjust_balance(id, dec!(-50000.0000)).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                account_id: id,
                balance: normalize(dec!(100)),
                requested: normalize(dec!(50000)),
            }
        );
        assert_eq!(balance(engine.store(), id).await, normalize(dec!(100)));
    }

    #[tokio::test]
    async fn withdrawing_everything_is_allowed() {
        let engine = engine();
        let id = open(dec!(12.5), "USD", engine.store()).await;

        assert_eq!(engine.withdraw(id, dec!(12.5)).await, Ok(1));
        assert_eq!(balance(engine.store(), id).await, Money::zero());
    }

    #[tokio::test]
    async fn zero_delta_is_idempotent() {
        let engine = engine();
        let id = open(dec!(7.25), "USD", engine.store()).await;

        for _ in 0..3 {
            assert_eq!(engine.adjust_balance(id, dec!(0)).await, Ok(1));
        }
        assert_eq!(balance(engine.store(), id).await, normalize(dec!(7.25)));
    }

    #[tokio::test]
    async fn delta_is_rounded_half_even_before_applying() {
        let engine = engine();
        let id = open(dec!(1), "USD", engine.store()).await;

        engine.adjust_balance(id, dec!(0.00015)).await.unwrap();
        assert_eq!(balance(engine.store(), id).await.to_string(), "1.0002");
    }

    #[tokio::test]
    async fn missing_account_is_reported() {
        let engine = engine();
        let missing = AccountId::new(404);

        let err = engine.adjust_balance(missing, dec!(1)).await.unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound(missing));
        assert!(engine.store().list_accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn amounts_beyond_fixed_scale_overflow_instead_of_losing_precision() {
        let engine = engine();
        let id = open(dec!(1), "USD", engine.store()).await;
        let huge = dec!(100000000000000000000000000);

        let err = engine.deposit(id, huge).await.unwrap_err();
        assert_eq!(err, LedgerError::AmountOverflow(id));

        let err = engine.withdraw(id, huge).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

        let stored = balance(engine.store(), id).await;
        assert_eq!(stored, normalize(dec!(1)));
        assert_eq!(stored.amount().scale(), remit_core::MONEY_SCALE);
    }

    #[tokio::test]
    async fn deposit_and_withdraw_require_positive_amounts() {
        let engine = engine();
        let id = open(dec!(10), "USD", engine.store()).await;

        for amount in [dec!(0), dec!(-1), dec!(0.00001)] {
            assert!(matches!(
                engine.deposit(id, amount).await,
                Err(LedgerError::InvalidAmount(_))
            ));
            assert!(matches!(
                engine.withdraw(id, amount).await,
                Err(LedgerError::InvalidAmount(_))
            ));
        }
        assert_eq!(balance(engine.store(), id).await, normalize(dec!(10)));
    }

    #[tokio::test]
    async fn transfer_moves_funds() {
        let engine = engine();
        let a = open(dec!(100.0000), "USD", engine.store()).await;
        let b = open(dec!(20.0000), "USD", engine.store()).await;

        let rows = engine
            .transfer(&TransferRequest::new("USD", dec!(30.0000), a, b))
            .await;
        assert_eq!(rows, Ok(2));
        assert_eq!(balance(engine.store(), a).await.to_string(), "70.0000");
        assert_eq!(balance(engine.store(), b).await.to_string(), "50.0000");
    }

    #[tokio::test]
    async fn transfer_from_higher_to_lower_id_maps_roles_correctly() {
        let engine = engine();
        let low = open(dec!(5), "EUR", engine.store()).await;
        let high = open(dec!(50), "EUR", engine.store()).await;

        engine
            .transfer(&TransferRequest::new("EUR", dec!(45), high, low))
            .await
            .unwrap();
        assert_eq!(balance(engine.store(), high).await, normalize(dec!(5)));
        assert_eq!(balance(engine.store(), low).await, normalize(dec!(50)));
    }

    #[tokio::test]
    async fn transfer_rejects_request_currency_mismatch() {
        let engine = engine();
        let a = open(dec!(100), "USD", engine.store()).await;
        let b = open(dec!(20), "USD", engine.store()).await;

        let err = engine
            .transfer(&TransferRequest::new("EUR", dec!(30), a, b))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CurrencyMismatch);
        assert_eq!(balance(engine.store(), a).await, normalize(dec!(100)));
        assert_eq!(balance(engine.store(), b).await, normalize(dec!(20)));
    }

    #[tokio::test]
    async fn transfer_rejects_cross_currency_accounts() {
        let engine = engine();
        let a = open(dec!(100), "USD", engine.store()).await;
        let b = open(dec!(20), "GBP", engine.store()).await;

        let err = engine
            .transfer(&TransferRequest::new("USD", dec!(30), a, b))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::CurrencyMismatch {
                expected: CurrencyCode::new("USD").unwrap(),
                found: "GBP".to_string(),
            }
        );
        assert_eq!(balance(engine.store(), b).await, normalize(dec!(20)));
    }

    #[tokio::test]
    async fn transfer_rejects_insufficient_funds() {
        let engine = engine();
        let a = open(dec!(10), "USD", engine.store()).await;
        let b = open(dec!(0), "USD", engine.store()).await;

        let err = engine
            .transfer(&TransferRequest::new("USD", dec!(10.0001), a, b))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(balance(engine.store(), a).await, normalize(dec!(10)));
        assert_eq!(balance(engine.store(), b).await, Money::zero());
    }

    #[tokio::test]
    async fn transfer_reports_whichever_account_is_missing() {
        let engine = engine();
        let a = open(dec!(10), "USD", engine.store()).await;
        let ghost = AccountId::new(999);

        let to_ghost = engine
            .transfer(&TransferRequest::new("USD", dec!(1), a, ghost))
            .await;
        assert_eq!(to_ghost, Err(LedgerError::AccountNotFound(ghost)));

        let from_ghost = engine
            .transfer(&TransferRequest::new("USD", dec!(1), ghost, a))
            .await;
        assert_eq!(from_ghost, Err(LedgerError::AccountNotFound(ghost)));
        assert_eq!(balance(engine.store(), a).await, normalize(dec!(10)));
    }

    #[tokio::test]
    async fn transfer_prevalidation_opens_no_transaction() {
        let engine = LedgerEngine::new(InMemoryLedgerStore::with_lock_timeout(
            std::time::Duration::from_millis(10),
        ));
        let a = open(dec!(10), "USD", engine.store()).await;

        // Hold the row: any transfer that got as far as locking would time out.
        let mut holder = engine.store().begin().await.unwrap();
        holder.lock_for_update(a).await.unwrap();

        let err = engine
            .transfer(&TransferRequest::new("XTS1", dec!(1), a, AccountId::new(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownCurrency(_)));

        let err = engine
            .transfer(&TransferRequest::new("USD", dec!(1), a, a))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::SameAccount(a));
    }

    #[tokio::test]
    async fn lock_timeout_surfaces_as_storage_error() {
        let engine = LedgerEngine::new(InMemoryLedgerStore::with_lock_timeout(
            std::time::Duration::from_millis(20),
        ));
        let a = open(dec!(10), "USD", engine.store()).await;

        let mut holder = engine.store().begin().await.unwrap();
        holder.lock_for_update(a).await.unwrap();

        let err = engine.adjust_balance(a, dec!(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Storage(StoreError::LockTimeout(_))));

        holder.rollback().await.unwrap();
        assert_eq!(engine.adjust_balance(a, dec!(1)).await, Ok(1));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: every successful transfer conserves the combined balance,
        /// and every failed one changes nothing.
        #[test]
        fn transfers_conserve_money(
            opening in (0i64..10_000_000, 0i64..10_000_000),
            amounts in prop::collection::vec((1i64..5_000_000, any::<bool>()), 1..20)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let engine = engine();
                let a = open(Decimal::new(opening.0, 4), "USD", engine.store()).await;
                let b = open(Decimal::new(opening.1, 4), "USD", engine.store()).await;
                let total = normalize(Decimal::new(opening.0 + opening.1, 4));

                for (amount, forward) in amounts {
                    let (from, to) = if forward { (a, b) } else { (b, a) };
                    let before = (balance(engine.store(), from).await, balance(engine.store(), to).await);
                    let result = engine
                        .transfer(&TransferRequest::new("USD", Decimal::new(amount, 4), from, to))
                        .await;

                    let after = (balance(engine.store(), from).await, balance(engine.store(), to).await);
                    match result {
                        Ok(rows) => prop_assert_eq!(rows, 2),
                        Err(err) => {
                            prop_assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
                            prop_assert_eq!(before, after);
                        }
                    }
                    prop_assert!(after.0.is_non_negative() && after.1.is_non_negative());
                    prop_assert_eq!(after.0.checked_add(after.1).unwrap(), total);
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
