use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use log::{debug, info};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::UpdateError;

pub(crate) const DOWNLOAD_PREFIX: &str = ".download-";

/// Bytes received so far and the advertised total, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Completed fraction in `0.0..=1.0`, or `None` in indeterminate mode.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total.filter(|total| *total > 0)?;
        Some((self.received as f64 / total as f64).min(1.0))
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percent(&self) -> Option<u8> {
        self.fraction().map(|fraction| (fraction * 100.0).floor() as u8)
    }
}

/// Open byte stream for one artifact download.
pub struct ArtifactStream {
    pub content_length: Option<u64>,
    pub chunks: BoxStream<'static, Result<Vec<u8>, UpdateError>>,
}

/// Fetches artifact bytes from a download URL.
#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<ArtifactStream, UpdateError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactTransport for HttpTransport {
    async fn open(&self, url: &str) -> Result<ArtifactStream, UpdateError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| UpdateError::network("download request", error))?;

        let status = response.status();
        if !status.is_success() {
            let details = format!("download failed with status {status}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                UpdateError::network("download request", details)
            } else {
                UpdateError::malformed(details)
            });
        }

        let content_length = response.content_length();
        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|error| UpdateError::interrupted(0, error))
            })
            .boxed();

        Ok(ArtifactStream {
            content_length,
            chunks,
        })
    }
}

/// A completely transferred artifact in the staging directory. The file is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct DownloadedArtifact {
    path: TempPath,
    size: u64,
}

impl DownloadedArtifact {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn path_buf(&self) -> PathBuf {
        self.path.to_path_buf()
    }
}

/// Transfer `url` into a private temporary file under `staging_dir`.
///
/// Any failure or cancellation removes the temporary file before returning.
///
/// # Errors
/// Returns [`UpdateError::Cancelled`] when `cancel` fires,
/// [`UpdateError::DownloadInterrupted`] when the stream errors, stalls for
/// longer than `chunk_timeout` or ends short of its advertised length, and
/// I/O errors for local write failures.
pub async fn download_artifact(
    transport: &dyn ArtifactTransport,
    url: &str,
    staging_dir: &Path,
    chunk_timeout: Duration,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(TransferProgress) + Send,
) -> Result<DownloadedArtifact, UpdateError> {
    tokio::fs::create_dir_all(staging_dir).await.map_err(|error| {
        UpdateError::io_with_path("failed to create staging directory", staging_dir, &error)
    })?;

    let named = tempfile::Builder::new()
        .prefix(DOWNLOAD_PREFIX)
        .suffix(".part")
        .tempfile_in(staging_dir)
        .map_err(|error| UpdateError::io("failed to create download file", error))?;
    let (std_file, temp_path) = named.into_parts();
    let mut file = tokio::fs::File::from_std(std_file);

    let stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(UpdateError::cancelled("download")),
        stream = transport.open(url) => stream?,
    };
    let ArtifactStream {
        content_length,
        mut chunks,
    } = stream;
    let total = content_length.filter(|total| *total > 0);

    info!("Downloading update from {url}");
    let mut received: u64 = 0;
    on_progress(TransferProgress { received, total });

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UpdateError::cancelled("download")),
            next = tokio::time::timeout(chunk_timeout, chunks.next()) => next,
        };

        let chunk = match next {
            Err(_) => {
                return Err(UpdateError::interrupted(
                    received,
                    format!("no data received for {}s", chunk_timeout.as_secs()),
                ));
            }
            Ok(None) => break,
            Ok(Some(Err(error))) => {
                let details = match error {
                    UpdateError::DownloadInterrupted { details, .. } => details,
                    other => other.to_string(),
                };
                return Err(UpdateError::interrupted(received, details));
            }
            Ok(Some(Ok(chunk))) => chunk,
        };

        file.write_all(&chunk).await.map_err(|error| {
            UpdateError::io_with_path("failed to write download data", &temp_path, &error)
        })?;
        received += chunk.len() as u64;
        on_progress(TransferProgress { received, total });
    }

    if let Some(total) = total
        && received < total
    {
        return Err(UpdateError::interrupted(
            received,
            format!("stream ended at {received} of {total} bytes"),
        ));
    }

    file.flush().await.map_err(|error| {
        UpdateError::io_with_path("failed to flush download file", &temp_path, &error)
    })?;
    file.sync_all().await.map_err(|error| {
        UpdateError::io_with_path("failed to sync download file", &temp_path, &error)
    })?;
    drop(file);

    debug!("Download complete: {received} bytes");
    Ok(DownloadedArtifact {
        path: temp_path,
        size: received,
    })
}
