use anyhow::Result;
use meta_harvester::{config::AppConfig, context::RunContext, db};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting meta-harvester with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(
        db::connect(
            &cfg.database_url,
            cfg.db_max_connections,
            cfg.db_acquire_timeout,
        )
        .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        db.close().await;
        return Ok(()); // exit after migration
    }

    // --- Run ---
    let ctx = RunContext::build(&cfg, db).await?;
    let outcome = ctx.pipeline.run(cfg.total).await;
    if let Ok(rows) = ctx.store.row_count().await {
        tracing::info!("meta table holds {} rows", rows);
    }
    ctx.close().await;

    let summary = outcome?;
    tracing::info!(
        "Processed {} objects ({} new, {} already known)",
        summary.listed,
        summary.inserted,
        summary.duplicates
    );
    Ok(())
}
