//! Backing stores the pipeline can list and fetch from.
//!
//! ## Variants
//! - [`S3Source`]: anonymous HTTP access to an S3-compatible bucket
//!   (ListObjectsV2 + GET object).
//! - [`LocalSource`]: a local directory exposed with the same listing
//!   semantics, useful for offline runs and tests.
//!
//! The variant is picked once at construction time via [`open_source`].

pub mod local;
pub mod s3;

pub use local::LocalSource;
pub use s3::S3Source;

use async_trait::async_trait;
use std::{io, path::Path, sync::Arc, time::Duration};
use thiserror::Error;

/// One ListObjectsV2-style page request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub continuation_token: Option<String>,
}

/// A listed key together with its size in bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for `{target}`")]
    Status { status: u16, target: String },
    #[error("malformed listing response")]
    Xml(#[from] quick_xml::DeError),
    #[error("invalid source url `{0}`")]
    InvalidUrl(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Paginated listing plus blob download, implemented per backing store.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Issue a single listing request.
    async fn list_page(&self, request: &ListRequest) -> SourceResult<ListPage>;

    /// Write the object's bytes to `dest`, creating or truncating it.
    /// Returns the number of bytes written.
    async fn fetch_to(&self, key: &str, dest: &Path) -> SourceResult<u64>;
}

/// Pick a source variant for `url`.
///
/// `file://` URLs and existing directories map to [`LocalSource`];
/// anything else is treated as an S3-compatible bucket URL.
pub fn open_source(url: &str, request_timeout: Duration) -> SourceResult<Arc<dyn ObjectSource>> {
    if let Some(root) = url.strip_prefix("file://") {
        return Ok(Arc::new(LocalSource::new(root)));
    }
    if Path::new(url).is_dir() {
        return Ok(Arc::new(LocalSource::new(url)));
    }
    Ok(Arc::new(S3Source::new(url, request_timeout)?))
}
