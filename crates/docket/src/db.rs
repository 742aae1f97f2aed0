use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::config::DbConfig;

/// Open the Postgres pool.
///
/// Connections are validated before use, recycled periodically, and
/// carry a statement timeout so a hung query cannot pin a pooled
/// connection indefinitely.
pub async fn connect(config: &DbConfig) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.url)?.application_name("docket");
    let statement_timeout_ms = config.statement_timeout_ms;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .test_before_acquire(true)
        .max_lifetime(Duration::from_secs(config.recycle_secs))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    Ok(pool)
}
