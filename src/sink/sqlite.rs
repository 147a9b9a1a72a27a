//! Relational sink on SQLite.
//!
//! Accounts, places and posts are upserted (latest write wins). Join tables
//! are insert-or-ignore on their natural key. Hashtags go through a
//! get-or-create dictionary before their join rows are written.

use super::{Sink, SinkError};
use crate::batch::{
    AccountRow, EntityKind, HashtagLink, MediaLink, MentionLink, PlaceRow, PostRow, RowSlice, UrlLink,
};
use ahash::AHashMap;
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Max tags per `IN (...)` lookup; stays well below SQLite's bound-parameter limit.
const LOOKUP_CHUNK: usize = 500;

/// Create every table and index if missing. With `reset`, drop them first.
pub fn apply_schema(conn: &Connection, reset: bool) -> Result<()> {
    if reset {
        let mut drop_sql = String::new();
        for kind in EntityKind::ALL.iter().rev() {
            drop_sql.push_str(&format!("DROP TABLE IF EXISTS {};\n", kind.table()));
        }
        drop_sql.push_str("DROP TABLE IF EXISTS hashtags;\n");
        conn.execute_batch(&drop_sql).context("drop tables")?;
        info!("Dropped existing tables");
    }
    conn.execute_batch(SCHEMA_SQL).context("apply schema")?;
    Ok(())
}

/// Row count for every table, in write order, followed by `hashtags`.
pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    let mut tables: Vec<&'static str> = EntityKind::ALL.iter().map(|k| k.table()).collect();
    tables.push("hashtags");
    tables
        .into_iter()
        .map(|t| {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {t}"), [], |row| row.get(0))
                .with_context(|| format!("count {t}"))?;
            Ok((t, n))
        })
        .collect()
}

fn classify(e: rusqlite::Error) -> SinkError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            SinkError::Conflict(e.to_string())
        }
        _ => SinkError::Fatal(e.to_string()),
    }
}

pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Open (or create) the database. `busy_timeout` is how long SQLite itself
    /// waits on a locked database before reporting a conflict.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Sink for SqliteSink {
    fn write(&mut self, rows: RowSlice<'_>) -> Result<usize, SinkError> {
        if rows.is_empty() {
            return Ok(0);
        }
        // IMMEDIATE takes the write lock up front, so contention surfaces here
        // instead of halfway through the batch.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(classify)?;
        let written = match rows {
            RowSlice::Accounts(r) => upsert_accounts(&tx, r),
            RowSlice::Places(r) => upsert_places(&tx, r),
            RowSlice::Posts(r) => upsert_posts(&tx, r),
            RowSlice::HashtagLinks(r) => link_hashtags(&tx, r),
            RowSlice::UrlLinks(r) => insert_urls(&tx, r),
            RowSlice::MediaLinks(r) => insert_media(&tx, r),
            RowSlice::MentionLinks(r) => insert_mentions(&tx, r),
        }
        .map_err(classify)?;
        tx.commit().map_err(classify)?;
        Ok(written)
    }
}

fn upsert_accounts(conn: &Connection, rows: &[AccountRow]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        r"
        INSERT INTO accounts
            (id, screen_name, name, description, verified, protected, followers_count,
             friends_count, statuses_count, listed_count, favourites_count, created_at, location, url)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(id) DO UPDATE SET
            screen_name = excluded.screen_name,
            name = excluded.name,
            description = excluded.description,
            verified = excluded.verified,
            protected = excluded.protected,
            followers_count = excluded.followers_count,
            friends_count = excluded.friends_count,
            statuses_count = excluded.statuses_count,
            listed_count = excluded.listed_count,
            favourites_count = excluded.favourites_count,
            created_at = excluded.created_at,
            location = excluded.location,
            url = excluded.url
        ",
    )?;
    for a in rows {
        stmt.execute(params![
            a.id,
            a.screen_name,
            a.name,
            a.description,
            a.verified,
            a.protected,
            a.followers_count,
            a.friends_count,
            a.statuses_count,
            a.listed_count,
            a.favourites_count,
            a.created_at,
            a.location,
            a.url,
        ])?;
    }
    Ok(rows.len())
}

fn upsert_places(conn: &Connection, rows: &[PlaceRow]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        r"
        INSERT INTO places (id, full_name, country, country_code, place_type)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(id) DO UPDATE SET
            full_name = excluded.full_name,
            country = excluded.country,
            country_code = excluded.country_code,
            place_type = excluded.place_type
        ",
    )?;
    for p in rows {
        stmt.execute(params![p.id, p.full_name, p.country, p.country_code, p.place_type])?;
    }
    Ok(rows.len())
}

fn upsert_posts(conn: &Connection, rows: &[PostRow]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        r"
        INSERT INTO posts
            (id, created_at, text, display_from, display_to, lang, user_id, source,
             in_reply_to_status_id, quoted_status_id, retweeted_status_id, place_id,
             retweet_count, favorite_count, possibly_sensitive)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(id) DO UPDATE SET
            created_at = excluded.created_at,
            text = excluded.text,
            display_from = excluded.display_from,
            display_to = excluded.display_to,
            lang = excluded.lang,
            user_id = excluded.user_id,
            source = excluded.source,
            in_reply_to_status_id = excluded.in_reply_to_status_id,
            quoted_status_id = excluded.quoted_status_id,
            retweeted_status_id = excluded.retweeted_status_id,
            place_id = excluded.place_id,
            retweet_count = excluded.retweet_count,
            favorite_count = excluded.favorite_count,
            possibly_sensitive = excluded.possibly_sensitive
        ",
    )?;
    for p in rows {
        stmt.execute(params![
            p.id,
            p.created_at,
            p.text,
            p.display_from,
            p.display_to,
            p.lang,
            p.user_id,
            p.source,
            p.in_reply_to_status_id,
            p.quoted_status_id,
            p.retweeted_status_id,
            p.place_id,
            p.retweet_count,
            p.favorite_count,
            p.possibly_sensitive,
        ])?;
    }
    Ok(rows.len())
}

/// Get-or-create: insert-ignore every distinct tag, resolve ids in bulk, then
/// write the join rows. A tag that does not resolve is logged and skipped.
fn link_hashtags(conn: &Connection, rows: &[HashtagLink]) -> rusqlite::Result<usize> {
    let mut tags: Vec<&str> = rows.iter().map(|r| r.tag.as_str()).collect();
    tags.sort_unstable();
    tags.dedup();

    {
        let mut ins = conn.prepare_cached("INSERT OR IGNORE INTO hashtags (tag) VALUES (?1)")?;
        for tag in &tags {
            ins.execute(params![tag])?;
        }
    }

    let mut ids: AHashMap<String, i64> = AHashMap::with_capacity(tags.len());
    for chunk in tags.chunks(LOOKUP_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let mut stmt = conn.prepare(&format!("SELECT tag, id FROM hashtags WHERE tag IN ({placeholders})"))?;
        let mut found = stmt.query(params_from_iter(chunk.iter()))?;
        while let Some(row) = found.next()? {
            ids.insert(row.get(0)?, row.get(1)?);
        }
    }

    let mut link = conn.prepare_cached("INSERT OR IGNORE INTO post_hashtag (post_id, hashtag_id) VALUES (?1, ?2)")?;
    let mut written = 0usize;
    for r in rows {
        match ids.get(r.tag.as_str()) {
            Some(hashtag_id) => written += link.execute(params![r.post_id, hashtag_id])?,
            None => warn!(post_id = r.post_id, tag = %r.tag, "hashtag did not resolve to an id, skipping link"),
        }
    }
    Ok(written)
}

fn insert_urls(conn: &Connection, rows: &[UrlLink]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        r"
        INSERT OR IGNORE INTO post_url
            (post_id, url, expanded_url, display_url, unwound_url, unwound_status, unwound_title, unwound_description)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
    )?;
    let mut written = 0usize;
    for u in rows {
        written += stmt.execute(params![
            u.post_id,
            u.url,
            u.expanded_url,
            u.display_url,
            u.unwound_url,
            u.unwound_status,
            u.unwound_title,
            u.unwound_description,
        ])?;
    }
    Ok(written)
}

fn insert_media(conn: &Connection, rows: &[MediaLink]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        r"
        INSERT OR IGNORE INTO post_media
            (post_id, media_id, kind, media_url, media_url_https, display_url, expanded_url)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
    )?;
    let mut written = 0usize;
    for m in rows {
        written += stmt.execute(params![
            m.post_id,
            m.media_id,
            m.kind,
            m.media_url,
            m.media_url_https,
            m.display_url,
            m.expanded_url,
        ])?;
    }
    Ok(written)
}

fn insert_mentions(conn: &Connection, rows: &[MentionLink]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO post_mention (post_id, account_id, screen_name, name) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut written = 0usize;
    for m in rows {
        written += stmt.execute(params![m.post_id, m.account_id, m.screen_name, m.name])?;
    }
    Ok(written)
}
