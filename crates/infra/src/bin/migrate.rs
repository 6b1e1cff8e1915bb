//! Applies the ledger schema to the database named by `DATABASE_URL`.

use anyhow::Context;
use tracing::info;

use remit_infra::schema;
use remit_infra::{LedgerConfig, PgLedgerStore};
use remit_ledger::AccountStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    remit_observability::init();

    let config = LedgerConfig::from_env().context("loading configuration")?;
    let store = PgLedgerStore::connect(&config)
        .await
        .context("connecting to Postgres")?;

    schema::migrate(store.pool())
        .await
        .context("applying schema")?;

    let accounts = store
        .list_accounts()
        .await
        .context("reading accounts after migration")?
        .len();
    info!(accounts, "ledger database ready");
    Ok(())
}
