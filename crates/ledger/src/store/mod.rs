//! Storage boundary for account rows.
//!
//! The ledger engine never talks to a database directly. It receives a store
//! handle at construction and drives transactions through these traits, so the
//! same protocol runs against the in-memory backend in tests and Postgres in
//! production.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use r#trait::{AccountStore, BalanceUpdate, LedgerStore, StoreError, StoreTransaction};
