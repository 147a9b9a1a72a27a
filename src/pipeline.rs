use crate::batch::EntityKind;
use crate::config::{DecodeErrorPolicy, IngestOptions};
use crate::dedup::DedupIndex;
use crate::logging::init_tracing_once;
use crate::paths::{discover_inputs, file_label, total_size, FileJob};
use crate::pool::ConnectionPool;
use crate::progress::ProgressScope;
use crate::sink::{apply_schema, merge_parts, remove_stale_parts, CsvSink, EntityStats, HashtagDictionary, Sink, SqliteSink, StatsSink, WrittenKeys};
use crate::worker::{ingest_file, FileReport, WorkerContext};
use crate::writer::RetryingWriter;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Runs every discovered input file through a sink, one file per worker.
#[derive(Clone, Default)]
pub struct Ingestor {
    pub(crate) opts: IngestOptions,
}

/// A file whose worker returned an error or panicked.
#[derive(Clone, Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub files: Vec<FileReport>,
    pub failures: Vec<FileFailure>,
    /// Distinct post ids seen across all workers.
    pub unique_posts: usize,
    /// Files produced after the workers finished (flat-file mode).
    pub outputs: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total_lines(&self) -> u64 {
        self.files.iter().map(|f| f.lines).sum()
    }

    pub fn total_posts(&self) -> u64 {
        self.files.iter().map(|f| f.posts).sum()
    }

    pub fn total_decode_errors(&self) -> u64 {
        self.files.iter().map(|f| f.decode_errors).sum()
    }

    pub fn rows_written(&self, kind: EntityKind) -> usize {
        self.files.iter().map(|f| f.rows_written(kind)).sum()
    }

    pub fn report_for(&self, path: &Path) -> Option<&FileReport> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn log(&self) {
        info!(
            files = self.files.len(),
            failed = self.failures.len(),
            lines = self.total_lines(),
            posts = self.total_posts(),
            unique_posts = self.unique_posts,
            decode_errors = self.total_decode_errors(),
            elapsed_s = self.elapsed.as_secs_f64(),
            "run finished"
        );
        for kind in EntityKind::ALL {
            info!(table = %kind, rows = self.rows_written(kind), "rows written");
        }
        for f in &self.failures {
            error!(file = %file_label(&f.path), error = %f.error, "file failed");
        }
    }
}

enum FileOutcome {
    Done(FileReport),
    Failed(FileFailure),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Ingestor {
    pub fn new() -> Self {
        Self { opts: IngestOptions::default() }
    }

    pub fn from_options(opts: IngestOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn input_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_input_dir(dir); self }
    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self { self.opts = self.opts.with_file_pattern(pattern); self }
    pub fn batch_size(mut self, n: usize) -> Self { self.opts = self.opts.with_batch_size(n); self }
    pub fn retry_limit(mut self, n: u32) -> Self { self.opts = self.opts.with_retry_limit(n); self }
    pub fn backoff(mut self, backoff: Duration) -> Self { self.opts = self.opts.with_backoff(backoff); self }
    pub fn drain_attempts(mut self, n: u32) -> Self { self.opts = self.opts.with_drain_attempts(n); self }
    pub fn worker_count(mut self, n: usize) -> Self { self.opts = self.opts.with_worker_count(n); self }
    pub fn decode_error_policy(mut self, policy: DecodeErrorPolicy) -> Self { self.opts = self.opts.with_decode_error_policy(policy); self }
    pub fn max_lines(mut self, n: Option<u64>) -> Self { self.opts = self.opts.with_max_lines(n); self }
    pub fn dead_letter_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_dead_letter_dir(dir); self }
    pub fn dedup_shards(mut self, n: usize) -> Self { self.opts = self.opts.with_dedup_shards(n); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn progress_label(mut self, label: impl Into<String>) -> Self { self.opts = self.opts.with_progress_label(label); self }
    pub fn io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self { self.opts = self.opts.with_io_buffers(read_bytes, write_bytes); self }

    // -------- Operations --------

    /// Input files for this configuration, sorted.
    pub fn discover(&self) -> Result<Vec<FileJob>> {
        let pattern = self.opts.pattern()?;
        discover_inputs(&self.opts.input_dir, &pattern)
    }

    /// Ingest every input through handles built by `factory`. The pool holds at
    /// most `worker_count` handles, one per busy worker.
    pub fn run<S, F>(&self, factory: F) -> Result<RunSummary>
    where
        S: Sink + 'static,
        F: Fn() -> Result<S> + Send + Sync + 'static,
    {
        init_tracing_once();
        let jobs = self.discover()?;
        let pool = ConnectionPool::new(self.opts.worker_count, factory);
        let summary = self.run_jobs(&jobs, &pool)?;
        let closed = pool.drain_idle().len();
        debug!(handles = closed, "sink handles closed");
        Ok(summary)
    }

    /// Relational mode: create the schema (dropping it first with `reset`),
    /// then load into the SQLite database at `db`.
    pub fn run_sqlite(&self, db: &Path, busy_timeout: Duration, reset: bool) -> Result<RunSummary> {
        init_tracing_once();
        {
            let setup = SqliteSink::open(db, busy_timeout)?;
            apply_schema(setup.connection(), reset)?;
        }
        let db = db.to_path_buf();
        self.run(move || SqliteSink::open(&db, busy_timeout))
    }

    /// Flat-file mode: per-file CSV parts under `out_dir`, merged into one CSV
    /// per table plus `hashtags.csv` once every worker is done.
    pub fn run_csv(&self, out_dir: &Path) -> Result<RunSummary> {
        init_tracing_once();
        let jobs = self.discover()?;
        let sources: Vec<PathBuf> = jobs.iter().map(|j| j.path.clone()).collect();
        std::fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
        remove_stale_parts(out_dir, &sources)?;

        let dictionary = Arc::new(HashtagDictionary::new());
        let keys = Arc::new(WrittenKeys::new());
        let pool = {
            let out_dir = out_dir.to_path_buf();
            let dictionary = dictionary.clone();
            let keys = keys.clone();
            ConnectionPool::new(self.opts.worker_count, move || {
                Ok(CsvSink::new(out_dir.clone(), dictionary.clone(), keys.clone()))
            })
        };
        let mut summary = self.run_jobs(&jobs, &pool)?;
        drop(pool.drain_idle());

        summary.outputs = merge_parts(out_dir, &sources, &dictionary, self.opts.write_buffer_bytes)
            .with_context(|| format!("merge CSV parts in {}", out_dir.display()))?;
        info!(
            dir = %out_dir.display(),
            files = summary.outputs.len(),
            hashtags = dictionary.len(),
            accounts = keys.accounts(),
            places = keys.places(),
            "CSV export written"
        );
        Ok(summary)
    }

    /// Count mode: run the full pipeline but only tally distinct rows per table.
    pub fn count(&self) -> Result<(RunSummary, Arc<EntityStats>)> {
        let stats = Arc::new(EntityStats::new());
        let shared = stats.clone();
        let summary = self.run(move || Ok(StatsSink::new(shared.clone())))?;
        Ok((summary, stats))
    }

    /// Ingest `jobs` on a dedicated pool of `worker_count` threads. A failed or
    /// panicking worker is recorded and does not stop the others.
    pub fn run_jobs<S: Sink>(&self, jobs: &[FileJob], pool: &ConnectionPool<S>) -> Result<RunSummary> {
        let started = Instant::now();
        let index = DedupIndex::with_shards(self.opts.dedup_shards);
        let ctx = WorkerContext {
            index: &index,
            writer: RetryingWriter::new(self.opts.retry_policy()),
            flush: self.opts.flush_policy(),
            on_decode_error: self.opts.on_decode_error,
            max_lines: self.opts.max_lines,
            dead_letter_dir: self.opts.dead_letter_dir.clone(),
            read_buffer_bytes: self.opts.read_buffer_bytes,
        };

        if jobs.is_empty() {
            warn!(dir = %self.opts.input_dir.display(), pattern = %self.opts.file_pattern, "No input files found.");
            return Ok(RunSummary { elapsed: started.elapsed(), ..Default::default() });
        }
        info!(files = jobs.len(), bytes = total_size(jobs), workers = pool.max_size(), "Planned files for ingestion.");

        let threads = self.opts.worker_count.max(1);
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ingest-{i}"))
            .build()
            .context("build worker thread pool")?;
        let label = self.opts.progress_label.clone().unwrap_or_else(|| "files".to_string());
        let progress = ProgressScope::files(label, jobs.len() as u64, self.opts.progress);

        let outcomes: Vec<FileOutcome> = workers.install(|| {
            jobs.par_iter()
                .with_max_len(1)
                .map(|job| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<FileReport> {
                        let mut handle = pool.acquire().context("acquire sink from pool")?;
                        ingest_file(&job.path, &ctx, &mut *handle)
                    }));
                    progress.file_done(&job.name());
                    match result {
                        Ok(Ok(report)) => FileOutcome::Done(report),
                        Ok(Err(e)) => {
                            let msg = format!("{e:#}");
                            error!(file = %job.name(), error = %msg, "worker failed");
                            FileOutcome::Failed(FileFailure { path: job.path.clone(), error: msg })
                        }
                        Err(payload) => {
                            let msg = format!("worker panicked: {}", panic_message(payload.as_ref()));
                            error!(file = %job.name(), error = %msg, "worker failed");
                            FileOutcome::Failed(FileFailure { path: job.path.clone(), error: msg })
                        }
                    }
                })
                .collect()
        });
        progress.finish("done");

        let mut summary = RunSummary::default();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Done(report) => summary.files.push(report),
                FileOutcome::Failed(failure) => summary.failures.push(failure),
            }
        }
        summary.unique_posts = index.len();
        summary.elapsed = started.elapsed();
        Ok(summary)
    }
}
