//! Flat-file sink: one CSV part per (input file, table), appended at every
//! flush, merged into one CSV per table once all workers are done.
//!
//! Hashtag ids come from a dictionary shared by every handle, so the same tag
//! gets the same id no matter which worker saw it first.

use super::{Sink, SinkError};
use crate::batch::{EntityKind, HashtagLink, RowSlice};
use crate::util::{append_with_backoff, create_with_backoff, is_retriable_io_error, remove_with_backoff, replace_file_atomic_backoff};
use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, File};
use std::hash::Hash;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Process-wide tag -> id map, ids assigned from 1 in first-seen order.
#[derive(Default)]
pub struct HashtagDictionary {
    inner: Mutex<DictState>,
}

#[derive(Default)]
struct DictState {
    ids: AHashMap<String, i64>,
    next_id: i64,
}

impl HashtagDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, tag: &str) -> i64 {
        let mut st = self.inner.lock();
        if let Some(id) = st.ids.get(tag) {
            return *id;
        }
        st.next_id += 1;
        let id = st.next_id;
        st.ids.insert(tag.to_string(), id);
        id
    }

    pub fn get(&self, tag: &str) -> Option<i64> {
        self.inner.lock().ids.get(tag).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(id, tag)` pairs ordered by id.
    pub fn entries(&self) -> Vec<(i64, String)> {
        let st = self.inner.lock();
        let mut out: Vec<(i64, String)> = st.ids.iter().map(|(t, id)| (*id, t.clone())).collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }
}

struct KeySet<K>(Mutex<AHashSet<K>>);

impl<K> Default for KeySet<K> {
    fn default() -> Self {
        Self(Mutex::new(AHashSet::new()))
    }
}

impl<K: Eq + Hash> KeySet<K> {
    /// Rows whose key nobody has claimed yet; their keys are claimed now.
    fn claim<'r, R>(&self, rows: &'r [R], key: impl Fn(&R) -> K) -> Vec<&'r R> {
        let mut set = self.0.lock();
        rows.iter().filter(|r| set.insert(key(*r))).collect()
    }

    fn release(&self, keys: impl Iterator<Item = K>) {
        let mut set = self.0.lock();
        for k in keys {
            set.remove(&k);
        }
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Keys already written to some part, shared by every handle of one export.
/// Accounts and places hold one row per id; url and media links one row per
/// (post, key). The first row written for a key is the one kept.
#[derive(Default)]
pub struct WrittenKeys {
    accounts: KeySet<i64>,
    places: KeySet<String>,
    urls: KeySet<(i64, String)>,
    media: KeySet<(i64, i64)>,
}

impl WrittenKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accounts(&self) -> usize {
        self.accounts.len()
    }

    pub fn places(&self) -> usize {
        self.places.len()
    }
}

#[derive(Serialize)]
struct HashtagIdRow {
    post_id: i64,
    hashtag_id: i64,
}

/// Column names per table, matching the row structs' field order.
fn header(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Accounts => &[
            "id", "screen_name", "name", "description", "verified", "protected", "followers_count",
            "friends_count", "statuses_count", "listed_count", "favourites_count", "created_at", "location", "url",
        ],
        EntityKind::Places => &["id", "full_name", "country", "country_code", "place_type"],
        EntityKind::Posts => &[
            "id", "created_at", "text", "display_from", "display_to", "lang", "user_id", "source",
            "in_reply_to_status_id", "quoted_status_id", "retweeted_status_id", "place_id", "retweet_count",
            "favorite_count", "possibly_sensitive",
        ],
        EntityKind::HashtagLinks => &["post_id", "hashtag_id"],
        EntityKind::UrlLinks => &[
            "post_id", "url", "expanded_url", "display_url", "unwound_url", "unwound_status", "unwound_title",
            "unwound_description",
        ],
        EntityKind::MediaLinks => &[
            "post_id", "media_id", "kind", "media_url", "media_url_https", "display_url", "expanded_url",
        ],
        EntityKind::MentionLinks => &["post_id", "account_id", "screen_name", "name"],
    }
}

/// Per-input part file for `table`.
pub fn part_path(out_dir: &Path, source: &Path, kind: EntityKind) -> PathBuf {
    let name = source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    out_dir.join(format!("{name}.{}.csv", kind.table()))
}

fn io_error(e: io::Error) -> SinkError {
    if is_retriable_io_error(&e) {
        SinkError::Conflict(e.to_string())
    } else {
        SinkError::Fatal(e.to_string())
    }
}

fn csv_error(e: csv::Error) -> SinkError {
    if let csv::ErrorKind::Io(io) = e.kind() {
        if is_retriable_io_error(io) {
            return SinkError::Conflict(e.to_string());
        }
    }
    SinkError::Fatal(e.to_string())
}

/// Append target for a CSV part that can be cut back after a failed write.
pub trait PartFile: Write {
    fn committed_len(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl PartFile for File {
    fn committed_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append `rows` to `part` as header-less CSV records, all or nothing: on
/// error the part is truncated back to its length before the call.
pub fn append_records<P: PartFile, T: Serialize>(
    part: &mut P,
    rows: impl IntoIterator<Item = T>,
) -> Result<usize, SinkError> {
    let start = part.committed_len().map_err(io_error)?;
    match write_records(&mut *part, rows) {
        Ok(n) => Ok(n),
        Err(e) => match part.truncate_to(start) {
            Ok(()) => Err(e),
            Err(cut) => Err(SinkError::Fatal(format!("{e}; rollback to {start} bytes failed: {cut}"))),
        },
    }
}

fn write_records<W: Write, T: Serialize>(out: W, rows: impl IntoIterator<Item = T>) -> Result<usize, SinkError> {
    let mut w = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::with_capacity(256 * 1024, out));
    let mut n = 0usize;
    for row in rows {
        w.serialize(row).map_err(csv_error)?;
        n += 1;
    }
    w.flush().map_err(io_error)?;
    Ok(n)
}

pub struct CsvSink {
    out_dir: PathBuf,
    source: Option<PathBuf>,
    dictionary: Arc<HashtagDictionary>,
    keys: Arc<WrittenKeys>,
}

impl CsvSink {
    pub fn new(out_dir: impl Into<PathBuf>, dictionary: Arc<HashtagDictionary>, keys: Arc<WrittenKeys>) -> Self {
        Self { out_dir: out_dir.into(), source: None, dictionary, keys }
    }

    fn append<T: Serialize>(&self, kind: EntityKind, rows: impl IntoIterator<Item = T>) -> Result<usize, SinkError> {
        let source = self
            .source
            .as_deref()
            .ok_or_else(|| SinkError::Fatal("CSV sink used before begin_file".to_string()))?;
        let path = part_path(&self.out_dir, source, kind);
        let mut file = append_with_backoff(&path, 16, 50).map_err(io_error)?;
        append_records(&mut file, rows)
    }

    /// Write only rows whose key no handle has written yet. Claimed keys are
    /// released again if the write fails, so the retry writes them.
    fn append_once<R: Serialize, K: Eq + Hash>(
        &self,
        kind: EntityKind,
        rows: &[R],
        keys: &KeySet<K>,
        key: impl Fn(&R) -> K,
    ) -> Result<usize, SinkError> {
        let fresh = keys.claim(rows, &key);
        if fresh.is_empty() {
            return Ok(0);
        }
        let result = self.append(kind, fresh.iter().copied());
        if result.is_err() {
            keys.release(fresh.iter().map(|r| key(*r)));
        }
        result
    }

    fn hashtag_rows(&self, rows: &[HashtagLink]) -> Vec<HashtagIdRow> {
        let mut seen: AHashSet<(i64, i64)> = AHashSet::with_capacity(rows.len());
        rows.iter()
            .filter_map(|r| {
                let hashtag_id = self.dictionary.get_or_create(&r.tag);
                seen.insert((r.post_id, hashtag_id)).then_some(HashtagIdRow { post_id: r.post_id, hashtag_id })
            })
            .collect()
    }
}

impl Sink for CsvSink {
    fn write(&mut self, rows: RowSlice<'_>) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let kind = rows.kind();
        match rows {
            RowSlice::Accounts(r) => self.append_once(kind, r, &self.keys.accounts, |a| a.id),
            RowSlice::Places(r) => self.append_once(kind, r, &self.keys.places, |p| p.id.clone()),
            RowSlice::Posts(r) => self.append(kind, r),
            RowSlice::HashtagLinks(r) => {
                let resolved = self.hashtag_rows(r);
                self.append(kind, resolved)
            }
            RowSlice::UrlLinks(r) => self.append_once(kind, r, &self.keys.urls, |u| (u.post_id, u.url.clone())),
            RowSlice::MediaLinks(r) => self.append_once(kind, r, &self.keys.media, |m| (m.post_id, m.media_id)),
            RowSlice::MentionLinks(r) => self.append(kind, r),
        }
    }

    fn begin_file(&mut self, source: &Path) -> Result<(), SinkError> {
        fs::create_dir_all(&self.out_dir).map_err(io_error)?;
        self.source = Some(source.to_path_buf());
        Ok(())
    }

    fn end_file(&mut self) -> Result<(), SinkError> {
        self.source = None;
        Ok(())
    }
}

/// Delete part files left behind by an earlier run over the same inputs.
pub fn remove_stale_parts(out_dir: &Path, sources: &[PathBuf]) -> Result<()> {
    for source in sources {
        for kind in EntityKind::ALL {
            remove_with_backoff(&part_path(out_dir, source, kind), 10, 25)?;
        }
    }
    Ok(())
}

/// Concatenate every source's part into `<out_dir>/<table>.csv` (with a header),
/// removing parts as they are consumed, and write `<out_dir>/hashtags.csv`.
/// Returns the final file paths.
pub fn merge_parts(
    out_dir: &Path,
    sources: &[PathBuf],
    dictionary: &HashtagDictionary,
    write_buf: usize,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let mut outputs = Vec::with_capacity(EntityKind::ALL.len() + 1);

    for kind in EntityKind::ALL {
        let final_path = out_dir.join(format!("{}.csv", kind.table()));
        let tmp = out_dir.join(format!("{}.csv.inprogress", kind.table()));
        let mut out = BufWriter::with_capacity(
            write_buf,
            create_with_backoff(&tmp, 16, 50).with_context(|| format!("create {}", tmp.display()))?,
        );
        out.write_all(header(kind).join(",").as_bytes())?;
        out.write_all(b"\n")?;
        for source in sources {
            let part = part_path(out_dir, source, kind);
            if !part.exists() {
                continue;
            }
            let mut r = BufReader::new(File::open(&part).with_context(|| format!("open {}", part.display()))?);
            io::copy(&mut r, &mut out)?;
            drop(r);
            remove_with_backoff(&part, 10, 25)?;
        }
        out.flush()?;
        drop(out);
        replace_file_atomic_backoff(&tmp, &final_path)?;
        outputs.push(final_path);
    }

    let hashtags_path = out_dir.join("hashtags.csv");
    let mut w = csv::Writer::from_path(&hashtags_path)
        .with_context(|| format!("create {}", hashtags_path.display()))?;
    w.write_record(["id", "tag"])?;
    for (id, tag) in dictionary.entries() {
        w.write_record([id.to_string(), tag])?;
    }
    w.flush()?;
    outputs.push(hashtags_path);

    Ok(outputs)
}
