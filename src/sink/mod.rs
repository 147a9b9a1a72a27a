//! Storage backends. A sink takes one table's rows at a time and writes them
//! atomically; it must tell a retryable write conflict apart from a hard failure.

mod flatfile;
mod sqlite;
mod stats;

pub use self::flatfile::{append_records, merge_parts, remove_stale_parts, CsvSink, HashtagDictionary, PartFile, WrittenKeys};
pub use self::sqlite::{apply_schema, table_counts, SqliteSink};
pub use self::stats::{EntityStats, StatsSink};

use crate::batch::RowSlice;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Transient contention (busy/locked, serialization failure); retry later.
    #[error("write conflict: {0}")]
    Conflict(String),
    /// Anything else. Retrying will not help.
    #[error("sink failure: {0}")]
    Fatal(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Conflict(_))
    }
}

pub trait Sink: Send {
    /// Write one table's rows as a single transaction. Returns rows written.
    fn write(&mut self, rows: RowSlice<'_>) -> Result<usize, SinkError>;

    /// Called once before the worker starts feeding rows from `source`.
    fn begin_file(&mut self, _source: &Path) -> Result<(), SinkError> {
        Ok(())
    }

    /// Called once after the worker finished draining `source`.
    fn end_file(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write(&mut self, rows: RowSlice<'_>) -> Result<usize, SinkError> {
        (**self).write(rows)
    }

    fn begin_file(&mut self, source: &Path) -> Result<(), SinkError> {
        (**self).begin_file(source)
    }

    fn end_file(&mut self) -> Result<(), SinkError> {
        (**self).end_file()
    }
}
