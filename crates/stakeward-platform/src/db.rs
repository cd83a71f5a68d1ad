use anyhow::Result;
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::ServiceConfig;

pub async fn connect_database(config: &ServiceConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    Ok(pool)
}
