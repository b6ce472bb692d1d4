//! Chunked object upload sizing.
//!
//! Small objects go up as a single atomic put; larger ones are split into
//! bounded-size parts, uploaded sequentially, and finalized from the ordered
//! list of per-part integrity tags.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::BoxError;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

// Size contract, per https://docs.aws.amazon.com/AmazonS3/latest/userguide/qfacts.html
/// Minimum part size; the last part of a transfer may be smaller.
pub const MIN_PART_SIZE: u64 = 5 * MIB;
/// Maximum size of a single part.
pub const MAX_PART_SIZE: u64 = 5 * GIB;
/// Maximum total object size.
pub const MAX_TOTAL_SIZE: u64 = 5 * TIB;
/// Part size used when the caller does not override it.
pub const DEFAULT_PART_SIZE: u64 = MAX_PART_SIZE / 5;

/// Sizing limits for an upload. [`UploadConfig::default`] carries the
/// provider contract constants; tests inject smaller limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Bytes read and uploaded per part.
    pub part_size: u64,
    /// Below this total size the object is uploaded as a single put.
    pub min_part_size: u64,
    /// Ceiling for `part_size`.
    pub max_part_size: u64,
    /// Sources larger than this are rejected before any network call.
    pub max_total_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_total_size: MAX_TOTAL_SIZE,
        }
    }
}

/// One finished part, in the order the remote store must receive them at
/// finalization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartRecord {
    /// 1-based, strictly increasing, gapless.
    pub part_number: i32,
    /// Opaque integrity tag returned by the store, when it provides one.
    pub etag: Option<String>,
}

/// Summary of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub bytes_uploaded: u64,
    pub parts_uploaded: usize,
}

/// Errors produced while sizing or running an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("source too large: {size} bytes exceeds limit of {limit}")]
    SourceTooLarge { size: u64, limit: u64 },

    #[error("part size too large: {part_size} bytes exceeds limit of {limit}")]
    PartTooLarge { part_size: u64, limit: u64 },

    #[error(transparent)]
    Source(#[from] std::io::Error),

    #[error("object store: {0}")]
    Store(#[source] BoxError),
}

/// Destination seam for part-wise object storage.
#[async_trait]
pub trait PartStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), BoxError>;

    /// Opens a multi-part transfer and returns its upload id.
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, BoxError>;

    /// Uploads one numbered part, returning the store's integrity tag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<Option<String>, BoxError>;

    /// Finalizes the transfer from the ordered part records.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartRecord>,
    ) -> Result<(), BoxError>;
}

/// A readable byte source that can report its total size up front.
#[async_trait]
pub trait UploadSource: AsyncRead + Unpin + Send {
    async fn total_size(&self) -> std::io::Result<u64>;
}

#[async_trait]
impl UploadSource for tokio::fs::File {
    async fn total_size(&self) -> std::io::Result<u64> {
        Ok(self.metadata().await?.len())
    }
}

/// Uploads `source` to `bucket`/`key` under the default size contract.
pub async fn upload<S>(
    store: &impl PartStore,
    source: &mut S,
    bucket: &str,
    key: &str,
) -> Result<UploadSummary, UploadError>
where
    S: UploadSource + ?Sized,
{
    upload_with_config(store, source, bucket, key, &UploadConfig::default()).await
}

/// Uploads `source` to `bucket`/`key`, choosing between a single put and a
/// multi-part transfer based on `config`.
///
/// A failure mid-transfer returns the underlying error without aborting the
/// multi-part upload on the store side; incomplete transfers are left for
/// external lifecycle cleanup.
pub async fn upload_with_config<S>(
    store: &impl PartStore,
    source: &mut S,
    bucket: &str,
    key: &str,
    config: &UploadConfig,
) -> Result<UploadSummary, UploadError>
where
    S: UploadSource + ?Sized,
{
    let total_size = source.total_size().await?;

    if total_size < config.min_part_size {
        let mut body = Vec::with_capacity(total_size as usize);
        source.read_to_end(&mut body).await?;
        store
            .put_object(bucket, key, body)
            .await
            .map_err(UploadError::Store)?;
        return Ok(UploadSummary {
            bytes_uploaded: total_size,
            parts_uploaded: 1,
        });
    }
    if total_size > config.max_total_size {
        return Err(UploadError::SourceTooLarge {
            size: total_size,
            limit: config.max_total_size,
        });
    }
    if config.part_size > config.max_part_size {
        return Err(UploadError::PartTooLarge {
            part_size: config.part_size,
            limit: config.max_part_size,
        });
    }

    let upload_id = store
        .create_multipart_upload(bucket, key)
        .await
        .map_err(UploadError::Store)?;

    let mut bytes_uploaded = 0u64;
    let mut part_number = 0i32;
    let mut completed_parts = Vec::new();
    loop {
        let mut buf = vec![0u8; config.part_size as usize];
        let bytes_read = read_full(source, &mut buf).await?;
        if bytes_read == 0 {
            break;
        }
        buf.truncate(bytes_read);
        part_number += 1;
        bytes_uploaded += bytes_read as u64;

        let etag = store
            .upload_part(bucket, key, &upload_id, part_number, buf)
            .await
            .map_err(UploadError::Store)?;
        completed_parts.push(CompletedPartRecord { part_number, etag });
    }

    let parts_uploaded = completed_parts.len();
    store
        .complete_multipart_upload(bucket, key, &upload_id, completed_parts)
        .await
        .map_err(UploadError::Store)?;

    Ok(UploadSummary {
        bytes_uploaded,
        parts_uploaded,
    })
}

/// Reads until `buf` is full or the source reaches end-of-stream. A short
/// count means the final part.
async fn read_full<S>(source: &mut S, buf: &mut [u8]) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
