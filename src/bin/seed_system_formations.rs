use anyhow::Context;
use formation_engine::database::{connect, init_schema};
use formation_engine::db::seed_system_formations;
use formation_engine::env::{ServiceConfig, TelemetryConfig, load_environment};
use formation_engine::telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_environment().map_err(|e| anyhow::anyhow!("Failed to load environment: {}", e))?;

    let guard = init_tracing(&TelemetryConfig::from_env())?;
    info!(exporting = guard.is_exporting(), "Tracing initialised");
    let config = ServiceConfig::from_env()?;

    let pool = connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to connect to {}", config.database_url))?;
    init_schema(&pool).await?;

    let mut conn = pool.acquire().await?;
    let inserted = seed_system_formations(&mut conn).await?;

    info!(inserted, "System formations seeded");
    println!("Seeded {} system formation(s)", inserted);
    Ok(())
}
