//! A local directory tree exposed with ListObjectsV2 semantics.
//!
//! Keys are paths relative to `root` with `/` separators. Listing supports
//! prefix filtering, delimiter grouping, and opaque continuation tokens
//! that resume strictly after the last key of the previous page.

use super::{ListEntry, ListPage, ListRequest, ObjectSource, SourceError, SourceResult};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MAX_LIST_KEYS: usize = 1000;

#[derive(Clone, Debug)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Rejects keys that are empty, absolute, contain `..`, or carry
    /// control characters.
    fn ensure_key_safe(key: &str) -> SourceResult<()> {
        if key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.contains("..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(SourceError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Every regular file under `root` as a sorted list of (key, size).
    async fn all_keys(&self) -> SourceResult<Vec<ListEntry>> {
        let root = self.root.clone();
        let entries = tokio::task::spawn_blocking(move || -> io::Result<Vec<ListEntry>> {
            let mut entries = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = entry.map_err(io::Error::other)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&root)
                    .map_err(io::Error::other)?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                entries.push(ListEntry {
                    key,
                    size: entry.metadata().map_err(io::Error::other)?.len(),
                });
            }
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(entries)
        })
        .await
        .map_err(io::Error::other)??;
        Ok(entries)
    }
}

#[async_trait]
impl ObjectSource for LocalSource {
    async fn list_page(&self, request: &ListRequest) -> SourceResult<ListPage> {
        let max_keys = request.max_keys.clamp(1, MAX_LIST_KEYS);
        let resume_after = request
            .continuation_token
            .as_deref()
            .map(decode_continuation_token);

        let mut rows: Vec<ListEntry> = self
            .all_keys()
            .await?
            .into_iter()
            .filter(|e| e.key.starts_with(&request.prefix))
            .filter(|e| resume_after.as_deref().is_none_or(|after| e.key.as_str() > after))
            .take(max_keys + 1)
            .collect();

        let is_truncated = rows.len() > max_keys;
        rows.truncate(max_keys);
        let next_continuation_token = if is_truncated {
            rows.last().map(|last| encode_continuation_token(&last.key))
        } else {
            None
        };

        let mut entries = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for row in rows {
            if let Some(delim) = &request.delimiter {
                if let Some(prefix) = compute_common_prefix(&row.key, &request.prefix, delim) {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            entries.push(row);
        }
        debug!(
            "local listing `{}`: {} keys, {} common prefixes",
            request.prefix,
            entries.len(),
            common_prefixes.len()
        );

        Ok(ListPage {
            entries,
            is_truncated,
            next_continuation_token,
        })
    }

    async fn fetch_to(&self, key: &str, dest: &Path) -> SourceResult<u64> {
        Self::ensure_key_safe(key)?;
        let src = self.root.join(key);
        fs::copy(&src, dest).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                SourceError::NotFound(key.to_string())
            } else {
                SourceError::Io(err)
            }
        })
    }
}

/// Compute the grouped "common prefix" for a key below `requested_prefix`.
///
/// Returns Some(prefix) if the remainder of the key contains the
/// delimiter, otherwise None.
fn compute_common_prefix(key: &str, requested_prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(requested_prefix)?;
    let pos = after_prefix.find(delimiter)?;
    let mut combined = String::from(requested_prefix);
    combined.push_str(&after_prefix[..pos + delimiter.len()]);
    Some(combined)
}

fn encode_continuation_token(key: &str) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, key: &str, body: &[u8]) {
        let path = root.join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn request(prefix: &str, max_keys: usize, token: Option<String>) -> ListRequest {
        ListRequest {
            prefix: prefix.into(),
            delimiter: Some("/".into()),
            max_keys,
            continuation_token: token,
        }
    }

    #[tokio::test]
    async fn pages_resume_after_last_key() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a", "b", "c", "d", "e"] {
            write(dir.path(), &format!("0/{name}.exe"), name.as_bytes());
        }
        write(dir.path(), "1/other.dll", b"x");
        let source = LocalSource::new(dir.path());

        let first = source.list_page(&request("0/", 2, None)).await.unwrap();
        assert!(first.is_truncated);
        let keys: Vec<_> = first.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["0/a.exe", "0/b.exe"]);

        let second = source
            .list_page(&request("0/", 2, first.next_continuation_token))
            .await
            .unwrap();
        let keys: Vec<_> = second.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["0/c.exe", "0/d.exe"]);

        let third = source
            .list_page(&request("0/", 2, second.next_continuation_token))
            .await
            .unwrap();
        assert!(!third.is_truncated);
        assert!(third.next_continuation_token.is_none());
        assert_eq!(third.entries.len(), 1);
        assert_eq!(third.entries[0].key, "0/e.exe");
        assert_eq!(third.entries[0].size, 1);
    }

    #[tokio::test]
    async fn nested_keys_are_grouped_under_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "0/top.exe", b"1");
        write(dir.path(), "0/nested/deep.exe", b"2");
        let source = LocalSource::new(dir.path());

        let page = source.list_page(&request("0/", 10, None)).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].key, "0/top.exe");
    }

    #[tokio::test]
    async fn fetch_copies_bytes_and_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "0/a.exe", b"MZ payload");
        let source = LocalSource::new(dir.path());
        let dest = dir.path().join("copy.bin");

        let written = source.fetch_to("0/a.exe", &dest).await.unwrap();
        assert_eq!(written, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"MZ payload");

        assert!(matches!(
            source.fetch_to("../etc/passwd", &dest).await,
            Err(SourceError::InvalidKey(_))
        ));
        assert!(matches!(
            source.fetch_to("0/missing.exe", &dest).await,
            Err(SourceError::NotFound(_))
        ));
    }
}
