//! Table definitions for the Postgres backend.
//!
//! Every statement is idempotent so `migrate` can run on each deploy.

use sqlx::PgPool;
use tracing::{info, instrument};

use remit_ledger::StoreError;

use crate::postgres::map_sqlx_error;

/// Statements applied in order by [`migrate`].
///
/// The `CHECK` constraints mirror the domain invariants: a balance is never
/// negative and carries four fractional digits, currency codes are three
/// uppercase letters. `NUMERIC(19, 4)` caps a balance below 10^15; a write past
/// that fails with SQLSTATE `22003`, which the ledger reports as an amount
/// overflow on the credited account.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        account_id    BIGSERIAL PRIMARY KEY,
        user_name     TEXT NOT NULL CHECK (length(btrim(user_name)) > 0),
        balance       NUMERIC(19, 4) NOT NULL CHECK (balance >= 0),
        currency_code CHAR(3) NOT NULL CHECK (currency_code ~ '^[A-Z]{3}$')
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS accounts_currency_code_idx
        ON accounts (currency_code)
    "#,
];

#[instrument(skip(pool), err)]
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    for (index, statement) in SCHEMA.iter().enumerate() {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        tracing::debug!(index, "schema statement applied");
    }
    info!(statements = SCHEMA.len(), "schema up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_statement_is_idempotent() {
        for statement in SCHEMA {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
    }

    #[test]
    fn balance_column_matches_money_scale() {
        let ddl = SCHEMA[0];
        assert!(ddl.contains(&format!("NUMERIC(19, {})", remit_core::MONEY_SCALE)));
        assert!(ddl.contains("CHECK (balance >= 0)"));
    }
}
