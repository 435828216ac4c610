//! Streaming archive downloads over a [`reqwest_middleware`] client.

use std::path::{Path, PathBuf};

use cppan_digest::{digest::Digest, Md5, Sha256};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use url::Url;

/// An error that can occur while downloading an archive. The partial file is
/// removed before any of these is returned.
#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    /// The request could not be sent or the body stream broke.
    #[error("failed to download {0}")]
    Transport(Url, #[source] reqwest_middleware::Error),

    /// The remote answered with a non-success status.
    #[error("{0} returned http status {1}")]
    Status(Url, reqwest::StatusCode),

    /// The body exceeded the configured size limit. The transfer is aborted
    /// mid-stream, not completed and discarded.
    #[error("archive at {0} exceeds the size limit of {1} bytes")]
    TooLarge(Url, u64),

    /// Writing the file failed.
    #[error("could not write '{}'", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
}

/// The hashes computed over a downloaded body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveHashes {
    /// Hex sha256 of the body.
    pub sha256: String,
    /// Hex md5 of the body.
    pub md5: String,
    /// Number of bytes written.
    pub size: u64,
}

/// Downloads `url` into `destination`, computing sha256 and md5 over the
/// stream and enforcing `size_limit`. On any failure the partial file is
/// removed before the error is returned, so the destination either holds the
/// complete body or nothing.
pub async fn download_to_path(
    client: &reqwest_middleware::ClientWithMiddleware,
    url: Url,
    destination: &Path,
    size_limit: u64,
) -> Result<ArchiveHashes, DownloadError> {
    let result = download_inner(client, url, destination, size_limit).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(destination).await;
    }
    result
}

async fn download_inner(
    client: &reqwest_middleware::ClientWithMiddleware,
    url: Url,
    destination: &Path,
    size_limit: u64,
) -> Result<ArchiveHashes, DownloadError> {
    let io_err = |e: std::io::Error| DownloadError::Io(destination.to_path_buf(), e);

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| DownloadError::Transport(url.clone(), e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status(url, status));
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = tokio::fs::File::create(destination).await.map_err(io_err)?;

    let mut sha256 = Sha256::new();
    let mut md5 = Md5::new();
    let mut size: u64 = 0;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| DownloadError::Transport(url.clone(), e.into()))?;
        size += chunk.len() as u64;
        if size > size_limit {
            // Dropping the stream cancels the transfer.
            return Err(DownloadError::TooLarge(url, size_limit));
        }
        sha256.update(&chunk);
        md5.update(&chunk);
        file.write_all(&chunk).await.map_err(io_err)?;
    }
    file.flush().await.map_err(io_err)?;

    Ok(ArchiveHashes {
        sha256: format!("{:x}", sha256.finalize()),
        md5: format!("{:x}", md5.finalize()),
        size,
    })
}
