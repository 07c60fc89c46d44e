//! Error kinds surfaced by the acquisition pipeline.
//!
//! Analysis failures never appear here: they are absorbed by the analyzer
//! into absent attributes. Everything below is fatal to either the run
//! (enumeration) or a single processing unit (fetch, hash, persistence).

use crate::sources::SourceError;
use std::{error::Error as StdError, io, time::Duration};
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Listing a partition failed. Fatal to the run, never retried.
#[derive(Debug, Error)]
#[error("listing `{prefix}` failed")]
pub struct EnumerationError {
    pub prefix: String,
    #[source]
    pub source: SourceError,
}

/// Retrieving one object failed. Fatal to its unit, never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetching `{key}` failed")]
    Source {
        key: String,
        #[source]
        source: SourceError,
    },
    #[error("fetching `{key}` timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },
}

/// Generic store failure. Never exposes the driver's error type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable(#[source] BoxError),
    #[error("store query failed")]
    Query(#[source] BoxError),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(Box::new(err)),
            other => StoreError::Query(Box::new(other)),
        }
    }
}

/// The dedup check or insert failed. Fatal to its unit, never retried.
#[derive(Debug, Error)]
#[error("persisting `{path}` failed")]
pub struct PersistenceError {
    pub path: String,
    #[source]
    pub source: StoreError,
}

/// Anything that turns a run into `Failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("hashing `{key}` failed")]
    Hash {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("scratch directory unusable")]
    Scratch(#[source] io::Error),
    #[error("processing unit panicked: {0}")]
    UnitPanicked(String),
}
