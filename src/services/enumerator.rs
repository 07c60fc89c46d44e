//! Budget-aware, continuation-driven listing of one partition.

use crate::{
    errors::EnumerationError,
    models::{ObjectDescriptor, Partition},
    sources::{ListEntry, ListRequest, ObjectSource, SourceError},
};
use futures::{Stream, TryStreamExt, stream};
use std::sync::Arc;
use tracing::debug;

/// Decides which listed keys are store artifacts rather than samples.
///
/// Folder placeholders (keys ending in the delimiter or equal to the
/// requested prefix) are always excluded; `marker_names` adds basenames
/// such as per-folder index files.
#[derive(Clone, Debug)]
pub struct ListingFilter {
    pub delimiter: String,
    pub marker_names: Vec<String>,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            delimiter: "/".into(),
            marker_names: Vec::new(),
        }
    }
}

impl ListingFilter {
    pub fn is_marker(&self, key: &str, prefix: &str) -> bool {
        if key == prefix || key.ends_with(&self.delimiter) {
            return true;
        }
        let basename = key.rsplit(self.delimiter.as_str()).next().unwrap_or(key);
        self.marker_names.iter().any(|name| name == basename)
    }
}

struct PageCursor {
    remaining: usize,
    token: Option<String>,
    exhausted: bool,
}

#[derive(Clone)]
pub struct Enumerator {
    source: Arc<dyn ObjectSource>,
    filter: ListingFilter,
}

impl Enumerator {
    pub fn new(source: Arc<dyn ObjectSource>, filter: ListingFilter) -> Self {
        Self { source, filter }
    }

    /// Lazily list up to `max_count` descriptors under `partition`.
    ///
    /// Pages are requested strictly one after another; each asks for at
    /// most `min(page_size, remaining)` keys. The budget is decremented by
    /// the number of descriptors actually yielded after filtering, so
    /// `max_count` caps the output exactly. Listing stops once the budget
    /// is spent or a page comes back untruncated. `max_count == 0` issues
    /// no request at all.
    pub fn list<'a>(
        &'a self,
        partition: &'a Partition,
        max_count: usize,
        page_size: usize,
    ) -> impl Stream<Item = Result<ObjectDescriptor, EnumerationError>> + Send + 'a {
        let page_size = page_size.max(1);
        let cursor = PageCursor {
            remaining: max_count,
            token: None,
            exhausted: false,
        };

        stream::try_unfold(cursor, move |mut cursor| async move {
            if cursor.exhausted || cursor.remaining == 0 {
                return Ok(None);
            }

            let request = ListRequest {
                prefix: partition.prefix.clone(),
                delimiter: Some(self.filter.delimiter.clone()),
                max_keys: page_size.min(cursor.remaining),
                continuation_token: cursor.token.take(),
            };
            debug!(
                "Listing `{}` with max_keys={} ({} left to acquire)",
                request.prefix, request.max_keys, cursor.remaining
            );
            let page = self
                .source
                .list_page(&request)
                .await
                .map_err(|source| enumeration_error(partition, source))?;

            let descriptors: Vec<ObjectDescriptor> = page
                .entries
                .into_iter()
                .filter(|entry| !self.filter.is_marker(&entry.key, &partition.prefix))
                .take(cursor.remaining)
                .map(|ListEntry { key, size }| ObjectDescriptor {
                    key,
                    size,
                    label: partition.label,
                })
                .collect();
            debug!("Acquired {} from `{}`", descriptors.len(), partition.prefix);

            cursor.remaining -= descriptors.len();
            if page.is_truncated {
                match page.next_continuation_token {
                    Some(token) => cursor.token = Some(token),
                    None => {
                        return Err(enumeration_error(
                            partition,
                            SourceError::Protocol(
                                "truncated page without continuation token".into(),
                            ),
                        ));
                    }
                }
            } else {
                cursor.exhausted = true;
            }

            Ok(Some((
                stream::iter(descriptors.into_iter().map(Ok::<_, EnumerationError>)),
                cursor,
            )))
        })
        .try_flatten()
    }
}

fn enumeration_error(partition: &Partition, source: SourceError) -> EnumerationError {
    EnumerationError {
        prefix: partition.prefix.clone(),
        source,
    }
}
