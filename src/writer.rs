//! Transactional writes with retry, and the end-of-file drain.
//!
//! In the read loop a table that keeps conflicting is left in its buffer for
//! the next flush round. At end of file there is no next round, so `drain`
//! repeats whole flush rounds, bounded by `drain_attempts`.

use crate::batch::{Batches, EntityKind, RowSlice};
use crate::sink::{Sink, SinkError};
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Attempts per table write (at least 1).
    pub retry_limit: u32,
    /// Fixed sleep between attempts and between unsuccessful drain rounds.
    pub backoff: Duration,
    /// Max flush rounds during drain before giving up.
    pub drain_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retry_limit: 3, backoff: Duration::from_millis(1000), drain_attempts: 30 }
    }
}

#[derive(Debug)]
pub enum WriteOutcome {
    Written(usize),
    GaveUp { attempts: u32, error: SinkError },
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written(_))
    }
}

/// Result of one flush round.
#[derive(Debug, Default, Clone)]
pub struct FlushReport {
    /// Rows written per table, indexed by `EntityKind::index()`.
    pub written: [usize; 7],
    /// Tables whose write gave up; their rows are still buffered.
    pub failed: Vec<EntityKind>,
    /// Tables not attempted this round.
    pub skipped: Vec<EntityKind>,
    /// Set when a non-retryable error stopped the round.
    pub fatal: Option<SinkError>,
    /// Error from the last write that gave up.
    pub last_error: Option<SinkError>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.fatal.is_none()
    }

    pub fn rows_written(&self) -> usize {
        self.written.iter().sum()
    }

    fn add_to(&self, totals: &mut [usize; 7]) {
        for (t, w) in totals.iter_mut().zip(self.written.iter()) {
            *t += *w;
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DrainReport {
    pub rounds: u32,
    pub written: [usize; 7],
}

#[derive(Debug, Error)]
pub enum DrainError {
    #[error("drain gave up after {rounds} rounds with {residue} rows still buffered")]
    Exhausted {
        rounds: u32,
        residue: usize,
        written: [usize; 7],
        last_error: Option<SinkError>,
    },
    #[error("drain stopped by a fatal sink error with {residue} rows still buffered: {error}")]
    Fatal {
        error: SinkError,
        residue: usize,
        written: [usize; 7],
    },
}

impl DrainError {
    /// Rows left in the buffers.
    pub fn residue(&self) -> usize {
        match self {
            DrainError::Exhausted { residue, .. } | DrainError::Fatal { residue, .. } => *residue,
        }
    }

    /// Rows that did reach the sink before the drain stopped.
    pub fn written(&self) -> &[usize; 7] {
        match self {
            DrainError::Exhausted { written, .. } | DrainError::Fatal { written, .. } => written,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RetryingWriter {
    policy: RetryPolicy,
}

impl RetryingWriter {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One table, one transaction per attempt. Conflicts are retried after
    /// `backoff` up to `retry_limit` attempts; fatal errors give up at once.
    pub fn write_with_retry(&self, sink: &mut dyn Sink, rows: RowSlice<'_>) -> WriteOutcome {
        let limit = self.policy.retry_limit.max(1);
        let kind = rows.kind();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match sink.write(rows) {
                Ok(n) => return WriteOutcome::Written(n),
                Err(e) if e.is_retryable() && attempt < limit => {
                    debug!(table = %kind, attempt, error = %e, "write conflict, backing off");
                    sleep(self.policy.backoff);
                }
                Err(e) => {
                    warn!(table = %kind, attempts = attempt, rows = rows.len(), error = %e, "giving up on write for this round");
                    return WriteOutcome::GaveUp { attempts: attempt, error: e };
                }
            }
        }
    }

    /// Write every non-empty buffer in table order, clearing the ones that
    /// succeeded. If accounts, places or posts did not make it, the join tables
    /// wait for the next round.
    pub fn flush(&self, sink: &mut dyn Sink, batches: &mut Batches) -> FlushReport {
        let mut report = FlushReport::default();
        let mut base_failed = false;

        for kind in EntityKind::ALL {
            if batches.len(kind) == 0 {
                continue;
            }
            if report.fatal.is_some() || (kind.is_join() && base_failed) {
                report.skipped.push(kind);
                continue;
            }
            match self.write_with_retry(sink, batches.rows(kind)) {
                WriteOutcome::Written(n) => {
                    report.written[kind.index()] += n;
                    batches.clear(kind);
                }
                WriteOutcome::GaveUp { error, .. } => {
                    report.failed.push(kind);
                    if !kind.is_join() {
                        base_failed = true;
                    }
                    if !error.is_retryable() {
                        report.fatal = Some(error.clone());
                    }
                    report.last_error = Some(error);
                }
            }
        }

        if !report.skipped.is_empty() && report.fatal.is_none() {
            debug!(skipped = ?report.skipped, "join tables deferred to next round");
        }
        report
    }

    /// Flush until every buffer is empty, at most `drain_attempts` rounds.
    pub fn drain(&self, sink: &mut dyn Sink, batches: &mut Batches) -> Result<DrainReport, DrainError> {
        let max_rounds = self.policy.drain_attempts.max(1);
        let mut report = DrainReport::default();
        let mut last_error: Option<SinkError> = None;

        while !batches.is_empty() {
            report.rounds += 1;
            let round = self.flush(sink, batches);
            round.add_to(&mut report.written);

            if let Some(error) = round.fatal {
                let residue = batches.total_rows();
                error!(round = report.rounds, residue, error = %error, "fatal sink error during drain");
                return Err(DrainError::Fatal { error, residue, written: report.written });
            }
            if batches.is_empty() {
                break;
            }
            if round.last_error.is_some() {
                last_error = round.last_error;
            }
            if report.rounds >= max_rounds {
                let residue = batches.total_rows();
                error!(rounds = report.rounds, residue, "drain exhausted its attempts");
                return Err(DrainError::Exhausted { rounds: report.rounds, residue, written: report.written, last_error });
            }
            debug!(round = report.rounds, pending = batches.total_rows(), "drain round incomplete, backing off");
            sleep(self.policy.backoff);
        }
        Ok(report)
    }
}
