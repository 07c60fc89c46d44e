#![allow(dead_code)]
//! Stubs shared by the integration tests.

use async_trait::async_trait;
use meta_harvester::{
    db,
    errors::{StoreError, StoreResult},
    models::{Fingerprint, MetaCandidate},
    services::{
        persister::{MetaSession, MetaStore},
        tools::{ToolCommand, ToolError, ToolRunner},
    },
    sources::{ListEntry, ListPage, ListRequest, ObjectSource, SourceError, SourceResult},
};
use sqlx::SqlitePool;
use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Barrier;

/// In-memory listing + blob source.
///
/// Keys are listed in insertion order per prefix. Continuation tokens are
/// plain offsets. Every request is recorded.
#[derive(Default)]
pub struct StubSource {
    objects: Mutex<Vec<(String, Vec<u8>)>>,
    failing_fetches: Mutex<HashSet<String>>,
    failing_prefixes: Mutex<HashSet<String>>,
    omit_tokens: Mutex<bool>,
    fetch_delay: Mutex<Option<Duration>>,
    pub requests: Mutex<Vec<ListRequest>>,
    pub fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), body.to_vec()));
    }

    pub fn fail_fetch(&self, key: &str) {
        self.failing_fetches.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_listing(&self, prefix: &str) {
        self.failing_prefixes
            .lock()
            .unwrap()
            .insert(prefix.to_string());
    }

    /// Report truncated pages without a continuation token.
    pub fn omit_tokens(&self) {
        *self.omit_tokens.lock().unwrap() = true;
    }

    pub fn delay_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub fn requested_page_sizes(&self) -> Vec<usize> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.max_keys)
            .collect()
    }
}

#[async_trait]
impl ObjectSource for StubSource {
    async fn list_page(&self, request: &ListRequest) -> SourceResult<ListPage> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing_prefixes.lock().unwrap().contains(&request.prefix) {
            return Err(SourceError::Status {
                status: 403,
                target: request.prefix.clone(),
            });
        }

        let matching: Vec<ListEntry> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(&request.prefix))
            .map(|(key, body)| ListEntry {
                key: key.clone(),
                size: body.len() as u64,
            })
            .collect();

        let start = request
            .continuation_token
            .as_deref()
            .map(|t| t.parse::<usize>().unwrap())
            .unwrap_or(0);
        let end = (start + request.max_keys).min(matching.len());
        let is_truncated = end < matching.len();
        let next_continuation_token = if is_truncated && !*self.omit_tokens.lock().unwrap() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(ListPage {
            entries: matching[start..end].to_vec(),
            is_truncated,
            next_continuation_token,
        })
    }

    async fn fetch_to(&self, key: &str, dest: &Path) -> SourceResult<u64> {
        self.fetched.lock().unwrap().push(key.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_fetches.lock().unwrap().contains(key) {
            tokio::fs::write(dest, b"partial").await?;
            return Err(SourceError::Status {
                status: 500,
                target: key.to_string(),
            });
        }
        let body = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| SourceError::NotFound(key.to_string()))?;
        tokio::fs::write(dest, &body).await?;
        Ok(body.len() as u64)
    }
}

pub const ARCH_OUTPUT: &str = "\nsample.exe:     file format pei-i386\narchitecture: i386, flags 0x0000010a:\nEXEC_P, HAS_DEBUG, D_PAGED\n";
pub const IMPORTS_OUTPUT: &str = "Import Table size: 00000050\n    offset 00010790 KERNEL32.dll\n";

/// Answers `arch`, `imports` and `exports`; the architecture tool exits
/// non-zero for files whose content starts with `BROKEN`.
pub struct StubTools;

impl StubTools {
    pub fn commands() -> meta_harvester::services::analyzer::AnalyzerTools {
        meta_harvester::services::analyzer::AnalyzerTools {
            architecture: ToolCommand::parse("arch").unwrap(),
            imports: ToolCommand::parse("imports"),
            exports: ToolCommand::parse("exports"),
        }
    }
}

#[async_trait]
impl ToolRunner for StubTools {
    async fn run(&self, command: &ToolCommand, path: &Path) -> Result<String, ToolError> {
        let content = tokio::fs::read(path).await.map_err(|source| ToolError::Spawn {
            program: command.program.clone(),
            source,
        })?;
        match command.program.as_str() {
            "arch" if content.starts_with(b"BROKEN") => Err(ToolError::Exit {
                program: command.program.clone(),
                code: Some(1),
                stderr: "File format not recognized".into(),
            }),
            "arch" => Ok(ARCH_OUTPUT.into()),
            "imports" => Ok(IMPORTS_OUTPUT.into()),
            "exports" => Ok(String::new()),
            _ => Err(ToolError::Exit {
                program: command.program.clone(),
                code: Some(127),
                stderr: String::new(),
            }),
        }
    }
}

/// Rows kept in memory; optionally every count waits on a barrier so that
/// concurrent sessions all observe the table before anyone inserts.
pub struct MemoryStore {
    rows: Arc<Mutex<BTreeMap<usize, MetaCandidate>>>,
    count_barrier: Option<Arc<Barrier>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::default(),
            count_barrier: None,
        }
    }

    pub fn with_count_barrier(parties: usize) -> Self {
        Self {
            rows: Arc::default(),
            count_barrier: Some(Arc::new(Barrier::new(parties))),
        }
    }

    pub fn rows_with(&self, fingerprint: &Fingerprint) -> usize {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| &row.fingerprint == fingerprint)
            .count()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

struct MemorySession {
    rows: Arc<Mutex<BTreeMap<usize, MetaCandidate>>>,
    count_barrier: Option<Arc<Barrier>>,
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn session(&self) -> StoreResult<Box<dyn MetaSession>> {
        Ok(Box::new(MemorySession {
            rows: self.rows.clone(),
            count_barrier: self.count_barrier.clone(),
        }))
    }

    async fn enforce_unique_fingerprint(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl MetaSession for MemorySession {
    async fn count_by_fingerprint(&mut self, fingerprint: &Fingerprint) -> StoreResult<i64> {
        let count = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|row| &row.fingerprint == fingerprint)
            .count() as i64;
        if let Some(barrier) = &self.count_barrier {
            barrier.wait().await;
        }
        Ok(count)
    }

    async fn insert(&mut self, candidate: &MetaCandidate) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.len() + 1;
        rows.insert(id, candidate.clone());
        Ok(())
    }

    async fn insert_if_absent(&mut self, candidate: &MetaCandidate) -> StoreResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        if rows.values().any(|row| row.fingerprint == candidate.fingerprint) {
            return Ok(false);
        }
        let id = rows.len() + 1;
        rows.insert(id, candidate.clone());
        Ok(true)
    }
}

/// A store whose sessions can never be opened.
pub struct DownStore;

#[async_trait]
impl MetaStore for DownStore {
    async fn session(&self) -> StoreResult<Box<dyn MetaSession>> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn enforce_unique_fingerprint(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Single-connection in-memory SQLite with the schema applied.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = db::connect("sqlite::memory:", 1, Duration::from_secs(5))
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}
