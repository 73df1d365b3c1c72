//! Write-once download sink.
//!
//! [`DownloadSink::deliver`] is the resume mechanism: a task whose local path
//! already exists is skipped without any network activity. New files are
//! streamed into a sibling `.part` file and renamed into place once complete,
//! so the final path only ever holds a fully written body.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use crate::fetch::{FetchError, FetchedBody, ResourceFetcher};
use crate::naming::DownloadTask;

/// Suffix of in-progress downloads.
pub const PART_SUFFIX: &str = "part";

/// Errors raised while delivering a task.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The resource could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// File system error (create directory, write, rename).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl SinkError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of delivering one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// The file was fetched and written.
    Written {
        /// Final path.
        path: PathBuf,
        /// Bytes written.
        bytes: u64,
    },
    /// The file already existed; nothing was fetched.
    Skipped {
        /// Existing path.
        path: PathBuf,
    },
}

/// Streams fetched resources to their task's local path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadSink;

impl DownloadSink {
    /// Creates a sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Delivers `task`, fetching through `fetcher` unless the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Fetch`] if the fetch fails or yields no bytes and
    /// [`SinkError::Io`] if the file cannot be written. In both cases no file
    /// is left at the task's local path.
    #[instrument(level = "debug", skip(self, task, fetcher), fields(url = %task.remote_url()))]
    pub async fn deliver(
        &self,
        task: &DownloadTask,
        fetcher: &dyn ResourceFetcher,
    ) -> Result<SinkOutcome, SinkError> {
        let path = task.local_path();
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| SinkError::io(path, e))?;
        if exists {
            debug!(path = %path.display(), "already downloaded");
            return Ok(SinkOutcome::Skipped {
                path: path.to_path_buf(),
            });
        }

        let body = fetcher.fetch_binary(task.remote_url()).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::io(parent, e))?;
        }

        let part = part_path(path);
        let result = write_part(&part, body, task.remote_url()).await;
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(path = %part.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&part).await;
                return Err(error);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, path).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(SinkError::io(path, e));
        }

        Ok(SinkOutcome::Written {
            path: path.to_path_buf(),
            bytes,
        })
    }
}

/// `dir/name.ext` → `dir/name.ext.part`.
#[must_use]
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(PART_SUFFIX);
    path.with_file_name(name)
}

/// Streams `body` into `part`, returning bytes written.
async fn write_part(part: &Path, body: FetchedBody, url: &str) -> Result<u64, SinkError> {
    let file = File::create(part)
        .await
        .map_err(|e| SinkError::io(part, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = body.stream;
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| SinkError::io(part, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| SinkError::io(part, e))?;

    if bytes_written == 0 {
        return Err(FetchError::empty_body(url).into());
    }
    Ok(bytes_written)
}
