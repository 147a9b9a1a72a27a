use crate::batch::FlushPolicy;
use crate::dedup::DedupIndex;
use crate::writer::RetryPolicy;
use anyhow::{Context, Result};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default input selector: plain or zstd-compressed JSONL.
pub const DEFAULT_FILE_PATTERN: &str = r"\.jsonl(\.zst)?$";

/// What a worker does with a non-blank line that fails to decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecodeErrorPolicy {
    /// Stop reading the file and drain what was accumulated.
    #[default]
    Abort,
    /// Log, count, keep reading.
    Skip,
}

impl FromStr for DecodeErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(DecodeErrorPolicy::Abort),
            "skip" => Ok(DecodeErrorPolicy::Skip),
            other => Err(format!("unknown decode error policy '{other}' (expected 'abort' or 'skip')")),
        }
    }
}

impl fmt::Display for DecodeErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecodeErrorPolicy::Abort => "abort",
            DecodeErrorPolicy::Skip => "skip",
        })
    }
}

/// Ingestion options with defaults and builder chaining.
#[derive(Clone, Debug)]
pub struct IngestOptions {
    pub input_dir: PathBuf,
    pub file_pattern: String,        // regex over file names, depth 1
    pub batch_size: usize,           // accepted lines between flushes
    pub retry_limit: u32,            // attempts per table write
    pub backoff: Duration,
    pub drain_attempts: u32,         // flush rounds allowed at end of file
    pub worker_count: usize,         // concurrent files; also the sink pool size
    pub on_decode_error: DecodeErrorPolicy,
    pub max_lines: Option<u64>,      // per-file cap on accepted lines
    pub dead_letter_dir: Option<PathBuf>,
    pub dedup_shards: usize,
    pub progress: bool,
    pub progress_label: Option<String>,

    // IO tuning
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data"),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
            batch_size: 100,
            retry_limit: 3,
            backoff: Duration::from_millis(1000),
            drain_attempts: 30,
            worker_count: 16,
            on_decode_error: DecodeErrorPolicy::Abort,
            max_lines: None,
            dead_letter_dir: None,
            dedup_shards: DedupIndex::DEFAULT_SHARDS,
            progress: true,
            progress_label: None,

            read_buffer_bytes: 256 * 1024,
            write_buffer_bytes: 256 * 1024,
        }
    }
}

impl IngestOptions {
    pub fn with_input_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.input_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = pattern.into();
        self
    }
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
    pub fn with_retry_limit(mut self, n: u32) -> Self {
        self.retry_limit = n.max(1);
        self
    }
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
    pub fn with_drain_attempts(mut self, n: u32) -> Self {
        self.drain_attempts = n.max(1);
        self
    }
    pub fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = n.max(1);
        self
    }
    pub fn with_decode_error_policy(mut self, policy: DecodeErrorPolicy) -> Self {
        self.on_decode_error = policy;
        self
    }
    pub fn with_max_lines(mut self, n: Option<u64>) -> Self {
        self.max_lines = n;
        self
    }
    pub fn with_dead_letter_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dead_letter_dir = Some(dir.as_ref().to_path_buf());
        self
    }
    pub fn with_dedup_shards(mut self, n: usize) -> Self {
        self.dedup_shards = n.max(1);
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_progress_label(mut self, label: impl Into<String>) -> Self {
        self.progress_label = Some(label.into());
        self
    }
    pub fn with_io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self {
        self.read_buffer_bytes = read_bytes.max(8 * 1024);
        self.write_buffer_bytes = write_bytes.max(8 * 1024);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { retry_limit: self.retry_limit.max(1), backoff: self.backoff, drain_attempts: self.drain_attempts.max(1) }
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::new(self.batch_size)
    }

    pub fn pattern(&self) -> Result<Regex> {
        Regex::new(&self.file_pattern).with_context(|| format!("invalid file pattern '{}'", self.file_pattern))
    }
}
