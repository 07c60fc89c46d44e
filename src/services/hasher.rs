//! Streaming content fingerprint of a local file.

use crate::models::Fingerprint;
use futures::StreamExt;
use md5::Context;
use std::{io, path::Path, time::Instant};
use tokio::{fs::File, io::AsyncRead};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Upper bound of bytes held in memory per read.
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Digest the file at `path` in [`HASH_CHUNK_SIZE`] chunks.
pub async fn digest_file(path: &Path) -> io::Result<Fingerprint> {
    debug!("MD5 calc of {} beginning", path.display());
    let started = Instant::now();
    let file = File::open(path).await?;
    let fingerprint = digest_reader(file, HASH_CHUNK_SIZE).await?;
    debug!(
        "MD5 calc of {} end. Took {:?}",
        path.display(),
        started.elapsed()
    );
    Ok(fingerprint)
}

/// Fold every chunk of `reader` into a running digest.
///
/// The result depends only on the bytes read, never on `chunk_size`.
pub async fn digest_reader<R>(reader: R, chunk_size: usize) -> io::Result<Fingerprint>
where
    R: AsyncRead + Unpin,
{
    let mut stream = ReaderStream::with_capacity(reader, chunk_size.max(1));
    let mut digest = Context::new();
    while let Some(chunk) = stream.next().await {
        digest.consume(&chunk?);
    }
    Ok(Fingerprint::from_digest(digest.compute()))
}

/// One-shot digest of an in-memory buffer.
pub fn digest_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_digest(md5::compute(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn streaming_matches_one_shot_around_chunk_boundaries() {
        let chunk = 16;
        for len in [0, 1, chunk - 1, chunk, chunk + 1, 3 * chunk, 3 * chunk + 5] {
            let bytes = content(len);
            let streamed = digest_reader(bytes.as_slice(), chunk).await.unwrap();
            assert_eq!(streamed, digest_bytes(&bytes), "length {len}");
        }
    }

    #[tokio::test]
    async fn chunk_size_does_not_change_digest() {
        let bytes = content(HASH_CHUNK_SIZE + 1);
        let small = digest_reader(bytes.as_slice(), 7).await.unwrap();
        let large = digest_reader(bytes.as_slice(), HASH_CHUNK_SIZE).await.unwrap();
        assert_eq!(small, large);
    }

    #[test]
    fn known_digests() {
        assert_eq!(
            digest_bytes(b"").as_str(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            digest_bytes(b"The quick brown fox jumps over the lazy dog").as_str(),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
        assert_eq!(digest_bytes(b"abc").as_bytes().len(), Fingerprint::HEX_LEN);
    }

    #[tokio::test]
    async fn file_digest_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        let bytes = content(2 * HASH_CHUNK_SIZE - 1);
        std::fs::write(&path, &bytes).unwrap();

        let first = digest_file(&path).await.unwrap();
        let second = digest_file(&path).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, digest_bytes(&bytes));
    }
}
