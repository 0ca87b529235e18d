/*

Postgres pool construction and schema migration.

$ Connection Pool
- One PgPool per process, built at startup and injected via AppState.
- Explicit limits and timeouts; no module-level singletons.

$ Migrations
- Embedded via sqlx::migrate!, applied before the listener starts.

*/

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.database_url)
        .await?;

    info!(max_connections = config.db_max_connections, "database pool ready");
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database migrations applied");
    Ok(())
}
