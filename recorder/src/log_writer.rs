use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use std::io::ErrorKind;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::rotation::rotate_if_needed;

const WRITE_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// What producers do when the queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backpressure {
    /// Wait up to the enqueue timeout, then drop the line.
    Block,
    /// Drop the line immediately.
    DropNewest,
}

#[derive(Clone, Debug)]
pub struct WriterOptions {
    pub capacity: usize,
    pub enqueue_timeout: Duration,
    pub backpressure: Backpressure,
    pub max_bytes: u64,
    pub keep_files: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            capacity: 1024,
            enqueue_timeout: Duration::from_millis(250),
            backpressure: Backpressure::Block,
            max_bytes: 0,
            keep_files: 5,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriterError {
    #[error("log writer stopped; detections can no longer be recorded")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    Dropped,
}

#[derive(Debug, Default)]
pub struct WriterStats {
    written: AtomicU64,
    dropped: AtomicU64,
    rotations: AtomicU64,
}

impl WriterStats {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }
}

/// Producer side of the detection log. Cheap to clone; the file itself is
/// owned by a single background task.
#[derive(Clone)]
pub struct LogWriter {
    sender: mpsc::Sender<String>,
    stats: Arc<WriterStats>,
    enqueue_timeout: Duration,
    backpressure: Backpressure,
}

/// Join handle of the writer task. Resolves once every [`LogWriter`] clone
/// is dropped and all queued lines are on disk.
pub struct WriterTask {
    handle: JoinHandle<Result<()>>,
    stats: Arc<WriterStats>,
}

impl LogWriter {
    pub fn spawn(log_path: PathBuf, options: WriterOptions) -> (Self, WriterTask) {
        let (sender, receiver) = mpsc::channel::<String>(options.capacity.max(1));
        let stats = Arc::new(WriterStats::default());

        let task_stats = stats.clone();
        let max_bytes = options.max_bytes;
        let keep_files = options.keep_files;
        let handle = tokio::spawn(async move {
            let res = run_writer(log_path, receiver, max_bytes, keep_files, task_stats).await;
            if let Err(e) = &res {
                tracing::error!(err = ?e, "log writer task failed");
            }
            res
        });

        let writer = Self {
            sender,
            stats: stats.clone(),
            enqueue_timeout: options.enqueue_timeout,
            backpressure: options.backpressure,
        };
        (writer, WriterTask { handle, stats })
    }

    /// Queues one line (no trailing newline). A full queue is handled per
    /// the backpressure policy; a stopped writer is an error.
    pub async fn write_line(&self, line: String) -> Result<Enqueued, WriterError> {
        let outcome = match self.backpressure {
            Backpressure::DropNewest => match self.sender.try_send(line) {
                Ok(()) => Enqueued::Queued,
                Err(TrySendError::Full(_)) => Enqueued::Dropped,
                Err(TrySendError::Closed(_)) => return Err(WriterError::Closed),
            },
            Backpressure::Block => {
                match tokio::time::timeout(self.enqueue_timeout, self.sender.send(line)).await {
                    Ok(Ok(())) => Enqueued::Queued,
                    Ok(Err(_)) => return Err(WriterError::Closed),
                    Err(_) => Enqueued::Dropped,
                }
            }
        };

        if outcome == Enqueued::Dropped {
            let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, "log queue saturated; detection line dropped");
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }
}

impl WriterTask {
    /// Waits for the writer to drain. Only returns once all producers are gone.
    pub async fn finish(self) -> Result<Arc<WriterStats>> {
        self.handle.await.context("log writer task panicked")??;
        Ok(self.stats)
    }
}

async fn run_writer(
    log_path: PathBuf,
    mut receiver: mpsc::Receiver<String>,
    max_bytes: u64,
    keep_files: usize,
    stats: Arc<WriterStats>,
) -> Result<()> {
    let mut file = open_append(&log_path).await?;
    let mut size = file.metadata().await?.len();
    tracing::info!(path = ?log_path, size, "log writer ready");

    while let Some(line) = receiver.recv().await {
        let mut bytes = line.into_bytes();
        bytes.push(b'\n');
        write_with_retry(&mut file, &log_path, &bytes).await?;
        size += bytes.len() as u64;
        stats.written.fetch_add(1, Ordering::Relaxed);

        if max_bytes > 0 && size > max_bytes {
            drop(file);
            let path = log_path.clone();
            let rotated =
                tokio::task::spawn_blocking(move || rotate_if_needed(&path, max_bytes, keep_files))
                    .await
                    .context("rotation task panicked")??;
            if rotated.rotated() {
                stats.rotations.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    archive = ?rotated.archive_path,
                    pruned = rotated.pruned,
                    "rotated detection log"
                );
            }
            file = open_append(&log_path).await?;
            size = file.metadata().await?.len();
        }
    }

    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

async fn open_append(log_path: &Path) -> Result<File> {
    if let Some(dir) = log_path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create log directory {:?}", dir))?;
        }
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .with_context(|| format!("failed to open log file at {:?}", log_path))
}

/// Writes one line, retrying with backoff. A retry resumes after the bytes
/// that already landed, so a failed attempt never duplicates part of a line.
async fn write_with_retry(file: &mut File, log_path: &Path, bytes: &[u8]) -> Result<()> {
    let mut backoff = INITIAL_BACKOFF;
    let mut written = 0;
    let mut attempt = 1;
    loop {
        match write_remaining(file, bytes, &mut written).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < WRITE_ATTEMPTS => {
                tracing::warn!(err = ?e, attempt, written, path = ?log_path, "log write failed; retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
                match open_append(log_path).await {
                    Ok(reopened) => *file = reopened,
                    Err(e) => tracing::warn!(err = ?e, "reopening log failed"),
                }
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("log write failed after {WRITE_ATTEMPTS} attempts at {:?}", log_path)
                });
            }
        }
    }
}

/// Writes `bytes[*written..]` and flushes, advancing `written` as bytes land.
async fn write_remaining<W: AsyncWrite + Unpin>(
    out: &mut W,
    bytes: &[u8],
    written: &mut usize,
) -> std::io::Result<()> {
    while *written < bytes.len() {
        let n = out.write(&bytes[*written..]).await?;
        if n == 0 {
            return Err(ErrorKind::WriteZero.into());
        }
        *written += n;
    }
    out.flush().await
}
