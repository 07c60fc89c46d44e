//! Materializes one remote object in the scratch directory.

use crate::{
    errors::FetchError,
    models::ObjectDescriptor,
    sources::ObjectSource,
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Downloaded bytes of one object, owned by the unit that fetched them.
///
/// Call [`LocalSample::discard`] on every exit path of the unit. If the
/// sample is dropped without it (a panicking unit, an aborted run) the
/// file is removed synchronously on drop.
#[derive(Debug)]
pub struct LocalSample {
    path: PathBuf,
    bytes: u64,
    discarded: bool,
}

impl LocalSample {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Remove the scratch file. A file that is already gone is fine.
    pub async fn discard(mut self) {
        remove_scratch(&self.path).await;
        self.discarded = true;
    }
}

impl Drop for LocalSample {
    fn drop(&mut self) {
        if !self.discarded {
            log_removal(&self.path, std::fs::remove_file(&self.path));
        }
    }
}

async fn remove_scratch(path: &Path) {
    log_removal(path, fs::remove_file(path).await);
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!("removed scratch file {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove scratch file {}: {}", path.display(), err),
    }
}

#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn ObjectSource>,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        scratch_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            scratch_dir: scratch_dir.into(),
            timeout,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// `{scratch_dir}/{uuid}-{basename}`, unique per call so concurrent
    /// units with equal basenames never share a file.
    fn scratch_path(&self, descriptor: &ObjectDescriptor) -> PathBuf {
        self.scratch_dir
            .join(format!("{}-{}", Uuid::new_v4(), descriptor.basename()))
    }

    /// Download `descriptor` into a fresh scratch file.
    ///
    /// Partial files are removed before an error is returned.
    pub async fn fetch(&self, descriptor: &ObjectDescriptor) -> Result<LocalSample, FetchError> {
        let dest = self.scratch_path(descriptor);
        debug!("src: {}, dest: {}", descriptor.key, dest.display());

        let result = tokio::time::timeout(self.timeout, self.source.fetch_to(&descriptor.key, &dest))
            .await;
        match result {
            Ok(Ok(bytes)) => Ok(LocalSample {
                path: dest,
                bytes,
                discarded: false,
            }),
            Ok(Err(source)) => {
                remove_scratch(&dest).await;
                Err(FetchError::Source {
                    key: descriptor.key.clone(),
                    source,
                })
            }
            Err(_) => {
                remove_scratch(&dest).await;
                Err(FetchError::Timeout {
                    key: descriptor.key.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }
}
