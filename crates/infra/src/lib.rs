//! Infrastructure layer: Postgres storage, schema bootstrap, configuration.

pub mod config;
pub mod postgres;
pub mod schema;

pub use config::{ConfigError, LedgerConfig};
pub use postgres::{PgLedgerStore, PgLedgerTx};
