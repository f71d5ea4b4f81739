//! Batched upload of a corpus.
//!
//! Batches go out strictly in order, one request each, so batch `i` commits
//! before batch `i + 1` is attempted. On a failure the error names the failed
//! batch and the last committed one; rerunning with `resume_from` set to the
//! batch after it writes only what is missing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use eventsynth_model::Event;

use crate::row::EventRow;
use crate::store::EventStore;
use crate::StoreError;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// How many times a batch is attempted and how long to wait in between.
///
/// Only transient failures are retried. The default is a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn fail_fast() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn exponential(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: initial_backoff.saturating_mul(32),
        }
    }

    /// Wait before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fail_fast()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// First batch index to write; earlier batches are skipped.
    pub resume_from: usize,
    /// Rewritten after every committed batch.
    pub checkpoint: Option<PathBuf>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            resume_from: 0,
            checkpoint: None,
        }
    }
}

impl WriterConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_resume_from(mut self, batch: usize) -> Self {
        self.resume_from = batch;
        self
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }
}

/// Progress persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_committed_batch: usize,
    pub batch_size: usize,
    pub rows_written: usize,
}

impl Checkpoint {
    /// `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, WriteError> {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| WriteError::Checkpoint(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(WriteError::Checkpoint(format!("{}: {e}", path.display()))),
        }
    }

    /// Write-then-rename so a crash never leaves a torn file.
    pub fn save(&self, path: &Path) -> Result<(), WriteError> {
        let tmp = path.with_extension("tmp");
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| WriteError::Checkpoint(e.to_string()))?;
        fs::write(&tmp, text)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|e| WriteError::Checkpoint(format!("{}: {e}", path.display())))
    }

    /// Batch to resume at; batch boundaries only line up with the same size.
    pub fn resume_index(&self, batch_size: usize) -> Result<usize, WriteError> {
        if self.batch_size != batch_size {
            return Err(WriteError::CheckpointMismatch {
                checkpoint: self.batch_size,
                requested: batch_size,
            });
        }
        Ok(self.last_committed_batch + 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub batches_total: usize,
    pub batches_written: usize,
    pub batches_skipped: usize,
    pub rows_written: usize,
    pub last_committed_batch: Option<usize>,
    /// Attempts beyond the first, across all batches.
    pub retries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,
    #[error("failed to prepare schema: {0}")]
    Schema(#[source] StoreError),
    #[error(
        "batch {batch_index} failed after {attempts} attempt(s); last committed batch: {}: {source}",
        .last_committed.map_or_else(|| "none".to_string(), |b| b.to_string())
    )]
    BatchFailed {
        batch_index: usize,
        last_committed: Option<usize>,
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("checkpoint was written with batch size {checkpoint}, not {requested}")]
    CheckpointMismatch { checkpoint: usize, requested: usize },
}

impl WriteError {
    /// Batch index a rerun should resume from.
    pub fn resume_from(&self) -> Option<usize> {
        match self {
            WriteError::BatchFailed { batch_index, .. } => Some(*batch_index),
            _ => None,
        }
    }
}

pub struct BatchWriter<'a, S: EventStore + ?Sized> {
    store: &'a S,
    config: WriterConfig,
}

impl<'a, S: EventStore + ?Sized> BatchWriter<'a, S> {
    pub fn new(store: &'a S, config: WriterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn ensure_schema(&self) -> Result<(), WriteError> {
        self.store.ensure_schema().map_err(WriteError::Schema)
    }

    /// Upload `events` in order. Batch `i` holds events
    /// `[i * batch_size, (i + 1) * batch_size)`.
    pub fn write(&self, events: &[Event]) -> Result<WriteReport, WriteError> {
        let batch_size = self.config.batch_size;
        if batch_size == 0 {
            return Err(WriteError::InvalidBatchSize);
        }

        let batches_total = events.len().div_ceil(batch_size);
        let mut report = WriteReport {
            batches_total,
            batches_skipped: self.config.resume_from.min(batches_total),
            last_committed_batch: self.config.resume_from.min(batches_total).checked_sub(1),
            ..Default::default()
        };
        if report.batches_skipped > 0 {
            info!(skipped = report.batches_skipped, "resuming upload");
        }

        for (index, chunk) in events
            .chunks(batch_size)
            .enumerate()
            .skip(self.config.resume_from)
        {
            let rows: Vec<EventRow> = chunk.iter().map(EventRow::from_event).collect();
            let attempts = self.insert_with_retry(index, &rows).map_err(|(attempts, source)| {
                WriteError::BatchFailed {
                    batch_index: index,
                    last_committed: report.last_committed_batch,
                    attempts,
                    source,
                }
            })?;

            report.retries += attempts - 1;
            report.batches_written += 1;
            report.rows_written += rows.len();
            report.last_committed_batch = Some(index);
            info!(
                batch = index + 1,
                batches = batches_total,
                rows = rows.len(),
                "uploaded batch {}/{}",
                index + 1,
                batches_total
            );

            if let Some(path) = &self.config.checkpoint {
                Checkpoint {
                    last_committed_batch: index,
                    batch_size,
                    rows_written: index * batch_size + rows.len(),
                }
                .save(path)?;
            }
        }

        info!(
            rows = report.rows_written,
            batches = report.batches_written,
            retries = report.retries,
            "upload complete"
        );
        Ok(report)
    }

    /// Returns attempts used on success, or attempts used and the last error.
    fn insert_with_retry(&self, index: usize, rows: &[EventRow]) -> Result<u32, (u32, StoreError)> {
        let policy = self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.insert(rows) {
                Ok(()) => return Ok(attempt),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let wait = policy.backoff(attempt);
                    warn!(
                        batch = index + 1,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "batch upload failed; retrying"
                    );
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    attempt += 1;
                }
                Err(err) => return Err((attempt, err)),
            }
        }
    }
}
