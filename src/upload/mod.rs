//! Local VHD to page blob upload.
//!
//! A disk is uploaded in fixed layout: the fixed image is described as extents by
//! [`VirtualDisk::extents`], split into Put Page sized ranges, and written by a bounded
//! number of concurrent writers. Ranges that are entirely zero are not sent.

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::storage::{BlobStorage, BlobUri, StorageCredentials, MAX_PAGE_WRITE};
use crate::vhd::{Extent, ExtentSource, VirtualDisk};

pub const DEFAULT_UPLOADER_THREADS: usize = 2;
pub const MAX_UPLOADER_THREADS: usize = 64;

/// What to upload and where
#[derive(Debug, Clone)]
pub struct UploadParameters {
    pub local_file: PathBuf,
    pub destination: BlobUri,
    pub credentials: StorageCredentials,
    pub uploader_threads: usize,
}

/// Result of one completed upload, printed as a JSON line per file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadContext {
    pub local_file_path: PathBuf,
    pub destination_uri: String,
    pub blob_size: u64,
    pub bytes_uploaded: u64,
    pub ranges_skipped: u64,
    #[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// One Put Page request worth of image content.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRange {
    pub blob_offset: u64,
    pub source: ExtentSource,
}

impl PageRange {
    pub fn len(&self) -> u64 {
        match &self.source {
            ExtentSource::File { len, .. } => *len,
            ExtentSource::Inline(bytes) => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits extents into ranges no longer than `max_len`.
pub fn plan_ranges(extents: &[Extent], max_len: u64) -> Vec<PageRange> {
    let mut ranges = Vec::new();
    for extent in extents {
        match &extent.source {
            ExtentSource::File { offset, len } => {
                let mut done = 0;
                while done < *len {
                    let piece = (*len - done).min(max_len);
                    ranges.push(PageRange {
                        blob_offset: extent.image_offset + done,
                        source: ExtentSource::File {
                            offset: offset + done,
                            len: piece,
                        },
                    });
                    done += piece;
                }
            }
            ExtentSource::Inline(bytes) => {
                let mut done = 0usize;
                while done < bytes.len() {
                    let piece = (bytes.len() - done).min(max_len as usize);
                    ranges.push(PageRange {
                        blob_offset: extent.image_offset + done as u64,
                        source: ExtentSource::Inline(bytes.slice(done..done + piece)),
                    });
                    done += piece;
                }
            }
        }
    }
    ranges
}

enum RangeOutcome {
    Written(u64),
    Skipped,
}

/// Uploads `disk` to `params.destination` as a page blob.
///
/// The destination container is created when missing and the page blob is created at
/// the disk's fixed-layout size before any pages are written.
pub async fn upload_vhd(
    storage: &dyn BlobStorage,
    disk: &VirtualDisk,
    params: &UploadParameters,
) -> Result<UploadContext> {
    let started = Instant::now();
    let blob_size = disk.blob_size();
    let destination = &params.destination;
    let credentials = &params.credentials;

    tracing::info!(
        file = %params.local_file.display(),
        destination = %destination,
        disk_type = %disk.disk_type(),
        blob_size,
        threads = params.uploader_threads,
        "uploading disk"
    );

    storage
        .create_container_if_not_exists(destination, credentials)
        .await?;
    storage
        .create_page_blob(destination, blob_size, credentials)
        .await?;

    let ranges = plan_ranges(&disk.extents(), MAX_PAGE_WRITE);
    let path = params.local_file.as_path();

    let outcomes: Vec<RangeOutcome> = stream::iter(ranges.into_iter().map(|range| async move {
        let data = read_range(path, &range).await?;
        if is_all_zero(&data) {
            return Ok::<_, anyhow::Error>(RangeOutcome::Skipped);
        }
        let len = data.len() as u64;
        storage
            .put_page(destination, range.blob_offset, data, credentials)
            .await?;
        Ok(RangeOutcome::Written(len))
    }))
    .buffer_unordered(params.uploader_threads.max(1))
    .try_collect()
    .await?;

    let mut bytes_uploaded = 0;
    let mut ranges_skipped = 0;
    for outcome in outcomes {
        match outcome {
            RangeOutcome::Written(len) => bytes_uploaded += len,
            RangeOutcome::Skipped => ranges_skipped += 1,
        }
    }

    let context = UploadContext {
        local_file_path: params.local_file.clone(),
        destination_uri: destination.without_query(),
        blob_size,
        bytes_uploaded,
        ranges_skipped,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        destination = %context.destination_uri,
        bytes_uploaded,
        ranges_skipped,
        elapsed_ms = context.elapsed.as_millis() as u64,
        "upload complete"
    );
    Ok(context)
}

async fn read_range(path: &Path, range: &PageRange) -> Result<Bytes> {
    match &range.source {
        ExtentSource::Inline(bytes) => Ok(bytes.clone()),
        ExtentSource::File { offset, len } => {
            let mut file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            file.seek(std::io::SeekFrom::Start(*offset)).await?;
            let mut buf = vec![0u8; *len as usize];
            file.read_exact(&mut buf)
                .await
                .with_context(|| format!("Failed to read {} bytes at {} from {}", len, offset, path.display()))?;
            Ok(Bytes::from(buf))
        }
    }
}

fn is_all_zero(data: &[u8]) -> bool {
    data.iter().all(|b| *b == 0)
}
