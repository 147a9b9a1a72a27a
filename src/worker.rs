//! Per-file ingest: read lines, decode, flatten into the worker's buffers,
//! flush every `batch_size` accepted lines, drain at end of file.
//!
//! A worker owns its buffers, decoder and writer. The only shared state it
//! touches is the dedup index and (through its caller) the sink pool.

use crate::batch::{Batches, EntityKind, FlushPolicy};
use crate::config::DecodeErrorPolicy;
use crate::decode::decode_post;
use crate::dedup::DedupIndex;
use crate::flatten::flatten;
use crate::jsonl::JsonlReader;
use crate::paths::file_label;
use crate::sink::Sink;
use crate::writer::{DrainError, RetryingWriter};
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything a worker needs besides the file and the sink.
#[derive(Clone)]
pub struct WorkerContext<'a> {
    pub index: &'a DedupIndex,
    pub writer: RetryingWriter,
    pub flush: FlushPolicy,
    pub on_decode_error: DecodeErrorPolicy,
    pub max_lines: Option<u64>,
    pub dead_letter_dir: Option<PathBuf>,
    pub read_buffer_bytes: usize,
}

impl<'a> WorkerContext<'a> {
    /// Defaults: batch size 100, default retry policy, abort on decode errors.
    pub fn new(index: &'a DedupIndex) -> Self {
        Self {
            index,
            writer: RetryingWriter::default(),
            flush: FlushPolicy::new(100),
            on_decode_error: DecodeErrorPolicy::Abort,
            max_lines: None,
            dead_letter_dir: None,
            read_buffer_bytes: 256 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileState {
    Open,
    Reading,
    Draining,
    Closed,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileState::Open => "open",
            FileState::Reading => "reading",
            FileState::Draining => "draining",
            FileState::Closed => "closed",
        })
    }
}

/// What happened to one input file.
#[derive(Clone, Debug, Default)]
pub struct FileReport {
    pub path: PathBuf,
    /// Non-blank lines decoded successfully.
    pub lines: u64,
    pub decode_errors: u64,
    /// Bytes read from disk (compressed size for `.zst` input).
    pub bytes_read: u64,
    /// Reading stopped early on a bad line.
    pub aborted: bool,
    /// Posts (top-level and embedded) turned into rows.
    pub posts: u64,
    /// Posts skipped because another line or worker already had them.
    pub duplicates: u64,
    /// Rows written per table, indexed by `EntityKind::index()`.
    pub written: [usize; 7],
    /// In-loop flush rounds.
    pub flushes: u32,
    pub drain_rounds: u32,
    pub elapsed: Duration,
}

impl FileReport {
    pub fn rows_written(&self, kind: EntityKind) -> usize {
        self.written[kind.index()]
    }

    pub fn total_rows_written(&self) -> usize {
        self.written.iter().sum()
    }

    fn add_written(&mut self, written: &[usize; 7]) {
        for (t, w) in self.written.iter_mut().zip(written.iter()) {
            *t += *w;
        }
    }
}

fn sink_err(e: crate::sink::SinkError) -> anyhow::Error {
    anyhow!(e)
}

/// Ingest one file through `sink`.
///
/// Fails when the file cannot be opened, when the sink rejects the file, or
/// when the end-of-file drain cannot empty the buffers. In the last case the
/// leftover rows are written to the dead-letter directory, if one is set.
pub fn ingest_file(path: &Path, ctx: &WorkerContext<'_>, sink: &mut dyn Sink) -> Result<FileReport> {
    let started = Instant::now();
    let file = file_label(path);
    let mut report = FileReport { path: path.to_path_buf(), ..Default::default() };

    debug!(file = %file, state = %FileState::Open, "worker state");
    let mut reader = JsonlReader::open(path, ctx.read_buffer_bytes)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    sink.begin_file(path)
        .map_err(sink_err)
        .with_context(|| format!("sink rejected {}", path.display()))?;

    debug!(file = %file, state = %FileState::Reading, "worker state");
    let mut batches = Batches::new();
    let mut line = String::new();
    let mut read_error: Option<anyhow::Error> = None;

    loop {
        if ctx.max_lines.is_some_and(|cap| report.lines >= cap) {
            info!(file = %file, lines = report.lines, "line cap reached");
            break;
        }
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(file = %file, line = reader.line_no() + 1, error = %e, "read failed, draining what was accumulated");
                read_error = Some(anyhow!(e).context(format!("read {}", path.display())));
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let post = match decode_post(&line) {
            Ok(post) => post,
            Err(e) => {
                report.decode_errors += 1;
                match ctx.on_decode_error {
                    DecodeErrorPolicy::Abort => {
                        warn!(file = %file, line = reader.line_no(), error = %e, "decode failed, abandoning rest of file");
                        report.aborted = true;
                        break;
                    }
                    DecodeErrorPolicy::Skip => {
                        warn!(file = %file, line = reader.line_no(), error = %e, "decode failed, skipping line");
                        continue;
                    }
                }
            }
        };
        report.lines += 1;

        let stats = flatten(post, ctx.index, &mut batches);
        report.posts += stats.accepted;
        report.duplicates += stats.duplicates;

        if ctx.flush.should_flush(report.lines) {
            report.flushes += 1;
            let round = ctx.writer.flush(sink, &mut batches);
            report.add_written(&round.written);
            if let Some(fatal) = round.fatal {
                error!(file = %file, error = %fatal, "fatal sink error, stop reading");
                break;
            }
            if !round.is_complete() {
                debug!(file = %file, failed = ?round.failed, skipped = ?round.skipped, "flush left rows for the next round");
            }
        }
    }

    report.bytes_read = reader.bytes_consumed();
    debug!(file = %file, state = %FileState::Draining, pending = batches.total_rows(), "worker state");
    let drained = ctx.writer.drain(sink, &mut batches);
    let end = sink.end_file().map_err(sink_err);
    report.elapsed = started.elapsed();

    match drained {
        Ok(d) => {
            report.drain_rounds = d.rounds;
            report.add_written(&d.written);
        }
        Err(e) => {
            report.add_written(e.written());
            dump_dead_letter(ctx, path, &batches, &e);
            debug!(file = %file, state = %FileState::Closed, "worker state");
            return Err(anyhow!(e).context(format!("drain failed for {}", path.display())));
        }
    }
    debug!(file = %file, state = %FileState::Closed, "worker state");

    if let Some(e) = read_error {
        return Err(e);
    }
    end.with_context(|| format!("sink failed to finish {}", path.display()))?;

    info!(
        file = %file,
        lines = report.lines,
        posts = report.posts,
        duplicates = report.duplicates,
        decode_errors = report.decode_errors,
        bytes = report.bytes_read,
        rows = report.total_rows_written(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "file done"
    );
    Ok(report)
}

fn dump_dead_letter(ctx: &WorkerContext<'_>, path: &Path, batches: &Batches, err: &DrainError) {
    let Some(dir) = ctx.dead_letter_dir.as_deref() else {
        warn!(file = %file_label(path), residue = err.residue(), "no dead-letter directory set, residue dropped");
        return;
    };
    let out = dir.join(format!("{}.residue.jsonl", file_label(path)));
    match batches.dump_residue(&out) {
        Ok(n) => warn!(file = %file_label(path), rows = n, out = %out.display(), "residue written to dead-letter file"),
        Err(e) => error!(file = %file_label(path), error = %e, "failed to write dead-letter file"),
    }
}
