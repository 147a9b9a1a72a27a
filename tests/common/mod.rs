#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tweetload::{EntityKind, RowSlice, Sink, SinkError};

/// A minimal valid tweet with an author.
pub fn tweet(id: i64, user_id: i64) -> Value {
    json!({
        "id": id,
        "text": format!("post {id}"),
        "created_at": "Mon Aug 10 05:11:31 +0000 2020",
        "lang": "en",
        "user": { "id": user_id, "screen_name": format!("user{user_id}"), "name": format!("User {user_id}") }
    })
}

/// A tweet carrying the given hashtags (as written by the author, not case-folded).
pub fn tweet_with_tags(id: i64, user_id: i64, tags: &[&str]) -> Value {
    let mut v = tweet(id, user_id);
    let hashtags: Vec<Value> = tags.iter().map(|t| json!({ "text": t })).collect();
    v["entities"] = json!({ "hashtags": hashtags });
    v
}

/// Write plain JSONL lines (one string per line).
pub fn write_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = File::create(path).unwrap();
    for l in lines {
        writeln!(&mut f, "{}", l).unwrap();
    }
}

/// Write a compressed `.zst` file containing the provided JSONL lines.
pub fn write_zst_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut enc = zstd::stream::write::Encoder::new(f, 3).unwrap();
    for l in lines {
        writeln!(&mut enc, "{}", l).unwrap();
    }
    enc.finish().unwrap();
}

pub fn to_lines(values: &[Value]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// `n` distinct tweets with ids starting at `first_id`, rendered as lines.
pub fn tweet_lines(first_id: i64, n: usize) -> Vec<String> {
    (0..n as i64).map(|i| tweet(first_id + i, 1000 + (first_id + i) % 7).to_string()).collect()
}

/// Read a text file line-by-line into strings (skips empty lines).
pub fn read_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    let r = BufReader::new(f);
    r.lines().map(|l| l.unwrap()).filter(|s| !s.is_empty()).collect()
}

/// Fresh temp dir that outlives the test (cleaned by the OS).
pub fn temp_dir() -> PathBuf {
    tempfile::tempdir().unwrap().into_path()
}

pub fn count_rows(db: &Path, sql: &str) -> i64 {
    let conn = rusqlite::Connection::open(db).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

/// In-memory sink that records successful writes and fails on a script:
/// queued failures are consumed first (optionally only for one table), then
/// `always` applies if set.
#[derive(Clone, Default)]
pub struct ScriptedSink {
    pub writes: Arc<Mutex<Vec<(EntityKind, usize)>>>,
    attempts: Arc<AtomicUsize>,
    failures: Arc<Mutex<VecDeque<(Option<EntityKind>, SinkError)>>>,
    always: Option<SinkError>,
}

impl ScriptedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_failing(err: SinkError) -> Self {
        Self { always: Some(err), ..Self::default() }
    }

    /// Queue `times` failures for writes to `kind` (or any table when `None`).
    pub fn fail_next(&self, kind: Option<EntityKind>, err: SinkError, times: usize) {
        let mut q = self.failures.lock();
        for _ in 0..times {
            q.push_back((kind, err.clone()));
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Sizes of successful writes to `kind`, in order.
    pub fn writes_for(&self, kind: EntityKind) -> Vec<usize> {
        self.writes.lock().iter().filter(|(k, _)| *k == kind).map(|(_, n)| *n).collect()
    }
}

impl Sink for ScriptedSink {
    fn write(&mut self, rows: RowSlice<'_>) -> Result<usize, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let kind = rows.kind();
        {
            let mut q = self.failures.lock();
            let hit = q.iter().position(|(k, _)| k.map_or(true, |k| k == kind));
            if let Some(i) = hit {
                let (_, err) = q.remove(i).unwrap();
                return Err(err);
            }
        }
        if let Some(err) = &self.always {
            return Err(err.clone());
        }
        self.writes.lock().push((kind, rows.len()));
        Ok(rows.len())
    }
}
