//! Ledger failure taxonomy.
//!
//! Every failure closes the transaction before it reaches the caller: validation
//! failures roll back without attempting a commit, storage failures roll back
//! and are wrapped. Nothing is retried here.

use rust_decimal::Decimal;
use thiserror::Error;

use remit_core::{AccountId, CurrencyCode, Money};

use crate::phase::TxPhase;
use crate::store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The lock target does not exist.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// The post-delta balance would be negative.
    #[error("insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Money,
        requested: Money,
    },

    /// Request currency differs from the source account, or source and
    /// destination accounts hold different currencies.
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        expected: CurrencyCode,
        found: String,
    },

    /// Deposit, withdrawal or transfer amount is not strictly positive.
    #[error("invalid amount: {0} (must be greater than zero)")]
    InvalidAmount(Decimal),

    /// Transfer currency is not a recognized ISO 4217 code.
    #[error("unrecognized currency code: '{0}'")]
    UnknownCurrency(String),

    /// Transfer source and destination are the same account.
    #[error("cannot transfer from account {0} to itself")]
    SameAccount(AccountId),

    /// The new balance does not fit the decimal representation.
    #[error("balance overflow on account {0}")]
    AmountOverflow(AccountId),

    /// Underlying transaction or connection failure; the transaction was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Rolling back after `cause` failed too. Lock and transaction state at the
    /// storage layer are unknown until its own timeout reclaims them.
    #[error("rollback failed during {phase} after: {cause}")]
    RollbackFailed {
        phase: TxPhase,
        cause: Box<LedgerError>,
        #[source]
        source: StoreError,
    },
}

/// Flat failure class, for callers that map errors to responses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AccountNotFound,
    InsufficientFunds,
    CurrencyMismatch,
    InvalidRequest,
    Storage,
    RollbackFailed,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::AccountNotFound(_) => ErrorKind::AccountNotFound,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::CurrencyMismatch { .. } => ErrorKind::CurrencyMismatch,
            LedgerError::InvalidAmount(_)
            | LedgerError::UnknownCurrency(_)
            | LedgerError::SameAccount(_)
            | LedgerError::AmountOverflow(_) => ErrorKind::InvalidRequest,
            LedgerError::Storage(_) => ErrorKind::Storage,
            LedgerError::RollbackFailed { .. } => ErrorKind::RollbackFailed,
        }
    }

    /// True when storage state may be left ambiguous (a failed rollback).
    pub fn is_critical(&self) -> bool {
        matches!(self, LedgerError::RollbackFailed { .. })
    }
}
