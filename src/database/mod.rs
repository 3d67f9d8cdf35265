pub mod schema;

pub use schema::*;

use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{info, instrument};

use crate::error::AppError;

#[instrument]
pub async fn connect(database_url: &str) -> Result<Pool<Sqlite>, AppError> {
    info!("Connecting to formation database");
    let pool = SqlitePool::connect(database_url).await?;
    Ok(pool)
}

/// Applies the schema. Safe to run against an already initialised database.
#[instrument(skip(pool))]
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    info!("Applying formation schema");
    sqlx::raw_sql(CURRENT_SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to apply schema: {}", e)))?;
    Ok(())
}
