//! Per-run wiring: everything a run needs, built at start and closed at end.
//!
//! The source client and the pool are `Send + Sync` handles shared by all
//! units through `Arc`; nothing lives in process-wide globals.

use crate::{
    config::AppConfig,
    db,
    services::{
        analyzer::Analyzer,
        enumerator::Enumerator,
        fetcher::Fetcher,
        persister::{Persister, SqliteStore},
        pipeline::{Pipeline, PipelineSettings},
        tools::ProcessRunner,
    },
    sources::{self, ObjectSource},
};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct RunContext {
    pub db: Arc<SqlitePool>,
    pub source: Arc<dyn ObjectSource>,
    pub store: SqliteStore,
    pub pipeline: Pipeline,
}

impl RunContext {
    /// Open the source, ensure the schema and assemble the pipeline.
    pub async fn build(cfg: &AppConfig, db: Arc<SqlitePool>) -> Result<Self> {
        let source = sources::open_source(&cfg.source_url, cfg.fetch_timeout)
            .with_context(|| format!("opening source `{}`", cfg.source_url))?;

        db::run_migrations(&db).await.context("applying schema")?;
        let store = SqliteStore::new(db.clone());
        let persister = Persister::connect(Arc::new(store.clone()), cfg.dedup)
            .await
            .context("preparing persister")?;

        let pipeline = Pipeline::new(
            Enumerator::new(source.clone(), cfg.listing_filter()),
            Fetcher::new(source.clone(), cfg.scratch_dir.clone(), cfg.fetch_timeout),
            Analyzer::new(
                Arc::new(ProcessRunner::new(cfg.tool_timeout)),
                cfg.analyzer_tools(),
            ),
            persister,
            PipelineSettings {
                malicious: cfg.malicious_partition(),
                clean: cfg.clean_partition(),
                page_size: cfg.page_size,
                concurrency: cfg.concurrency,
            },
        );

        Ok(Self {
            db,
            source,
            store,
            pipeline,
        })
    }

    /// Release pooled connections. Call once the run has settled.
    pub async fn close(self) {
        self.db.close().await;
    }
}
