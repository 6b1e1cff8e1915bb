//! Balance-mutation ledger.
//!
//! Owns the lock → validate → mutate → commit protocol for single-account
//! adjustments and two-account transfers. Storage is reached only through the
//! traits in [`store`]; this crate ships an in-memory backend, the Postgres
//! backend lives in `remit-infra`.

pub mod engine;
pub mod error;
pub mod phase;
pub mod request;
pub mod store;

pub use engine::LedgerEngine;
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use phase::TxPhase;
pub use request::TransferRequest;
pub use store::{
    AccountStore, BalanceUpdate, InMemoryLedgerStore, LedgerStore, StoreError, StoreTransaction,
};
