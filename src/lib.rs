mod config;
mod paths;
mod jsonl;
mod util;
mod logging;
mod progress;

mod model;
mod decode;
mod dedup;
mod flatten;
mod batch;

mod pool;
mod sink;
mod writer;
mod worker;
mod pipeline;

pub use crate::config::{DecodeErrorPolicy, IngestOptions, DEFAULT_FILE_PATTERN};
pub use crate::pipeline::{FileFailure, Ingestor, RunSummary};
pub use crate::paths::{discover_inputs, FileJob};

// Record model and line decoding.
pub use crate::model::{Account, Entities, Hashtag, Media, Place, Post, UnwoundUrl, Url, UserMention};
pub use crate::decode::{decode_post, merge_extended_entities, to_rfc3339, DecodeError};

// Flattening and per-worker buffers.
pub use crate::dedup::DedupIndex;
pub use crate::flatten::{flatten, normalize_hashtag, FlattenStats};
pub use crate::batch::{
    AccountRow, Batches, EntityKind, FlushPolicy, HashtagLink, MediaLink, MentionLink, PlaceRow, PostRow, RowSlice,
    UrlLink,
};

// Writing: pool, retry/drain, per-file worker.
pub use crate::pool::{ConnectionPool, PooledSink};
pub use crate::writer::{DrainError, DrainReport, FlushReport, RetryPolicy, RetryingWriter, WriteOutcome};
pub use crate::worker::{ingest_file, FileReport, WorkerContext};

// Storage backends.
pub use crate::sink::{
    append_records, apply_schema, merge_parts, remove_stale_parts, table_counts, CsvSink, EntityStats,
    HashtagDictionary, PartFile, Sink, SinkError, SqliteSink, StatsSink, WrittenKeys,
};

pub use crate::logging::{init_tracing, init_tracing_once};
pub use crate::progress::{set_global_multiprogress, ProgressScope};

// NDJSON helpers, also used to read dead-letter files back.
pub use crate::jsonl::{JsonlReader, NdjsonWriter};
