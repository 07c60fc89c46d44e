//! Dedup-aware persistence of metadata rows.
//!
//! Two strategies are available:
//! - [`DedupMode::CheckThenInsert`] counts rows with the candidate's
//!   fingerprint and inserts only when the count is zero. The two steps
//!   are not atomic, so concurrent units digesting identical content can
//!   both insert.
//! - [`DedupMode::Atomic`] relies on a UNIQUE index on `fingerprint` and
//!   inserts with `ON CONFLICT DO NOTHING`, so at most one row ever lands.

use crate::{
    errors::{PersistenceError, StoreError, StoreResult},
    models::{Fingerprint, MetaCandidate, MetaRecord},
};
use async_trait::async_trait;
use sqlx::{SqlitePool, pool::PoolConnection, sqlite::Sqlite};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DedupMode {
    #[default]
    CheckThenInsert,
    Atomic,
}

impl FromStr for DedupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "check" | "check-then-insert" => Ok(DedupMode::CheckThenInsert),
            "atomic" | "upsert" => Ok(DedupMode::Atomic),
            other => Err(format!("unknown dedup mode `{}`", other)),
        }
    }
}

impl fmt::Display for DedupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupMode::CheckThenInsert => f.write_str("check"),
            DedupMode::Atomic => f.write_str("atomic"),
        }
    }
}

/// One store session, held only for a count+insert sequence.
#[async_trait]
pub trait MetaSession: Send {
    async fn count_by_fingerprint(&mut self, fingerprint: &Fingerprint) -> StoreResult<i64>;

    async fn insert(&mut self, candidate: &MetaCandidate) -> StoreResult<()>;

    /// Insert unless a row with the same fingerprint exists, as one atomic
    /// store operation. Returns whether a row was written.
    async fn insert_if_absent(&mut self, candidate: &MetaCandidate) -> StoreResult<bool>;
}

/// Session factory handed to the [`Persister`].
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn session(&self) -> StoreResult<Box<dyn MetaSession>>;

    /// Install whatever storage-level constraint makes
    /// [`MetaSession::insert_if_absent`] atomic.
    async fn enforce_unique_fingerprint(&self) -> StoreResult<()>;
}

/// `meta` table in SQLite. Each session is one pooled connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<SqlitePool>,
}

impl SqliteStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn row_count(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM meta")
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    pub async fn records(&self) -> StoreResult<Vec<MetaRecord>> {
        let rows = sqlx::query_as::<_, MetaRecord>(
            "SELECT id, created, fingerprint, path, size, extension,
                    architecture, imports, exports
             FROM meta ORDER BY id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl MetaStore for SqliteStore {
    async fn session(&self) -> StoreResult<Box<dyn MetaSession>> {
        let conn = self.db.acquire().await?;
        Ok(Box::new(SqliteSession { conn }))
    }

    async fn enforce_unique_fingerprint(&self) -> StoreResult<()> {
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS meta_fingerprint_uq ON meta (fingerprint)")
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

struct SqliteSession {
    conn: PoolConnection<Sqlite>,
}

const INSERT_META: &str = "INSERT INTO meta (
        created, fingerprint, path, size, extension, architecture, imports, exports
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

#[async_trait]
impl MetaSession for SqliteSession {
    async fn count_by_fingerprint(&mut self, fingerprint: &Fingerprint) -> StoreResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(1) AS count FROM meta WHERE fingerprint = ?")
                .bind(fingerprint.as_bytes())
                .fetch_one(&mut *self.conn)
                .await?;
        Ok(count)
    }

    async fn insert(&mut self, candidate: &MetaCandidate) -> StoreResult<()> {
        bind_candidate(sqlx::query(INSERT_META), candidate)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    async fn insert_if_absent(&mut self, candidate: &MetaCandidate) -> StoreResult<bool> {
        let sql = format!("{} ON CONFLICT(fingerprint) DO NOTHING", INSERT_META);
        let result = bind_candidate(sqlx::query(&sql), candidate)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn bind_candidate<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    candidate: &'q MetaCandidate,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(candidate.created)
        .bind(candidate.fingerprint.as_bytes())
        .bind(&candidate.path)
        .bind(candidate.size)
        .bind(&candidate.extension)
        .bind(&candidate.architecture)
        .bind(candidate.imports)
        .bind(candidate.exports)
}

#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn MetaStore>,
    mode: DedupMode,
}

impl Persister {
    /// Build a persister; in [`DedupMode::Atomic`] the uniqueness
    /// constraint is installed first.
    pub async fn connect(store: Arc<dyn MetaStore>, mode: DedupMode) -> StoreResult<Self> {
        if mode == DedupMode::Atomic {
            store.enforce_unique_fingerprint().await?;
        }
        Ok(Self { store, mode })
    }

    pub fn mode(&self) -> DedupMode {
        self.mode
    }

    /// Store `candidate` unless its fingerprint is already present.
    /// Returns whether a row was inserted.
    pub async fn persist(&self, candidate: &MetaCandidate) -> Result<bool, PersistenceError> {
        debug!("Entry process: {} ({})", candidate.path, candidate.fingerprint);
        self.persist_inner(candidate)
            .await
            .map_err(|source| PersistenceError {
                path: candidate.path.clone(),
                source,
            })
    }

    async fn persist_inner(&self, candidate: &MetaCandidate) -> Result<bool, StoreError> {
        let mut session = self.store.session().await?;
        let inserted = match self.mode {
            DedupMode::CheckThenInsert => {
                let existing = session
                    .count_by_fingerprint(&candidate.fingerprint)
                    .await?;
                debug!("DB query result: {}", existing);
                if existing == 0 {
                    session.insert(candidate).await?;
                    true
                } else {
                    false
                }
            }
            DedupMode::Atomic => session.insert_if_absent(candidate).await?,
        };
        if inserted {
            debug!("Added new row to db: {}", candidate.path);
        }
        Ok(inserted)
    }
}
