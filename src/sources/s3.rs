//! S3-compatible bucket accessed over plain HTTP without request signing.
//!
//! The bucket URL may be virtual-hosted (`https://bucket.s3.region.amazonaws.com`)
//! or path-style (`http://127.0.0.1:3000/bucket`); objects live at
//! `{bucket_url}/{key}` and listings at `{bucket_url}?list-type=2`.

use super::{ListEntry, ListPage, ListRequest, ObjectSource, SourceError, SourceResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::{path::Path, time::Duration};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
    #[serde(default)]
    contents: Vec<Contents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Contents {
    key: String,
    size: u64,
}

#[derive(Clone)]
pub struct S3Source {
    client: reqwest::Client,
    bucket_url: Url,
    request_timeout: Duration,
}

impl S3Source {
    /// Build a client for `bucket_url`. `request_timeout` bounds each
    /// listing round-trip and every connection attempt.
    pub fn new(bucket_url: &str, request_timeout: Duration) -> SourceResult<Self> {
        let parsed =
            Url::parse(bucket_url).map_err(|_| SourceError::InvalidUrl(bucket_url.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(bucket_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            bucket_url: parsed,
            request_timeout,
        })
    }

    /// `{bucket_url}/{key}` with every key segment percent-encoded.
    fn object_url(&self, key: &str) -> SourceResult<Url> {
        let mut url = self.bucket_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.bucket_url.to_string()))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl ObjectSource for S3Source {
    async fn list_page(&self, request: &ListRequest) -> SourceResult<ListPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("list-type", "2".into()),
            ("prefix", request.prefix.clone()),
            ("max-keys", request.max_keys.to_string()),
        ];
        if let Some(delimiter) = &request.delimiter {
            query.push(("delimiter", delimiter.clone()));
        }
        if let Some(token) = &request.continuation_token {
            query.push(("continuation-token", token.clone()));
        }

        let response = self
            .client
            .get(self.bucket_url.clone())
            .query(&query)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                target: request.prefix.clone(),
            });
        }

        let body = response.text().await?;
        let page = parse_list_response(&body)?;
        debug!(
            "listed {} keys under `{}` (truncated: {})",
            page.entries.len(),
            request.prefix,
            page.is_truncated
        );
        Ok(page)
    }

    async fn fetch_to(&self, key: &str, dest: &Path) -> SourceResult<u64> {
        let url = self.object_url(key)?;
        debug!("Downloading from {} to {}", url, dest.display());

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(SourceError::NotFound(key.to_string())),
            status if !status.is_success() => {
                return Err(SourceError::Status {
                    status: status.as_u16(),
                    target: key.to_string(),
                });
            }
            _ => {}
        }

        let mut file = File::create(dest).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Decode a ListObjectsV2 XML body.
fn parse_list_response(body: &str) -> SourceResult<ListPage> {
    let result: ListBucketResult = quick_xml::de::from_str(body)?;
    Ok(ListPage {
        entries: result
            .contents
            .into_iter()
            .map(|c| ListEntry {
                key: c.key,
                size: c.size,
            })
            .collect(),
        is_truncated: result.is_truncated,
        next_continuation_token: result.next_continuation_token,
    })
}
