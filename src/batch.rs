//! Per-worker row buffers, one per table, plus the flush trigger.
//!
//! Buffers are only cleared after their write succeeded; anything that failed
//! stays here and goes out with the next flush.

use crate::decode::to_rfc3339;
use crate::jsonl::NdjsonWriter;
use crate::model::{Account, Place};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

/// Tables in write order. Accounts, places and posts come before the join
/// tables that reference post ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Accounts,
    Places,
    Posts,
    HashtagLinks,
    UrlLinks,
    MediaLinks,
    MentionLinks,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Accounts,
        EntityKind::Places,
        EntityKind::Posts,
        EntityKind::HashtagLinks,
        EntityKind::UrlLinks,
        EntityKind::MediaLinks,
        EntityKind::MentionLinks,
    ];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Accounts => "accounts",
            EntityKind::Places => "places",
            EntityKind::Posts => "posts",
            EntityKind::HashtagLinks => "post_hashtag",
            EntityKind::UrlLinks => "post_url",
            EntityKind::MediaLinks => "post_media",
            EntityKind::MentionLinks => "post_mention",
        }
    }

    /// Join rows keyed by post id; written only after their posts.
    pub fn is_join(self) -> bool {
        matches!(
            self,
            EntityKind::HashtagLinks | EntityKind::UrlLinks | EntityKind::MediaLinks | EntityKind::MentionLinks
        )
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccountRow {
    pub id: i64,
    pub screen_name: String,
    pub name: String,
    pub description: String,
    pub verified: Option<bool>,
    pub protected: Option<bool>,
    pub followers_count: i64,
    pub friends_count: i64,
    pub statuses_count: i64,
    pub listed_count: i64,
    pub favourites_count: i64,
    pub created_at: Option<String>,
    pub location: String,
    pub url: String,
}

impl From<Account> for AccountRow {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            created_at: a.created_at.as_deref().and_then(to_rfc3339),
            screen_name: a.screen_name,
            name: a.name,
            description: a.description,
            verified: a.verified,
            protected: a.protected,
            followers_count: a.followers_count,
            friends_count: a.friends_count,
            statuses_count: a.statuses_count,
            listed_count: a.listed_count,
            favourites_count: a.favourites_count,
            location: a.location,
            url: a.url,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlaceRow {
    pub id: String,
    pub full_name: String,
    pub country: String,
    pub country_code: String,
    pub place_type: String,
}

impl From<Place> for PlaceRow {
    fn from(p: Place) -> Self {
        Self {
            id: p.id,
            full_name: p.full_name,
            country: p.country,
            country_code: p.country_code,
            place_type: p.place_type,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PostRow {
    pub id: i64,
    pub created_at: Option<String>,
    pub text: String,
    pub display_from: Option<i64>,
    pub display_to: Option<i64>,
    pub lang: String,
    pub user_id: Option<i64>,
    pub source: String,
    pub in_reply_to_status_id: Option<i64>,
    pub quoted_status_id: Option<i64>,
    pub retweeted_status_id: Option<i64>,
    pub place_id: Option<String>,
    pub retweet_count: i64,
    pub favorite_count: i64,
    pub possibly_sensitive: Option<bool>,
}

/// `tag` is already case-folded.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct HashtagLink {
    pub post_id: i64,
    pub tag: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UrlLink {
    pub post_id: i64,
    pub url: String,
    pub expanded_url: String,
    pub display_url: String,
    pub unwound_url: Option<String>,
    pub unwound_status: Option<i64>,
    pub unwound_title: Option<String>,
    pub unwound_description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MediaLink {
    pub post_id: i64,
    pub media_id: i64,
    pub kind: String,
    pub media_url: String,
    pub media_url_https: String,
    pub display_url: String,
    pub expanded_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MentionLink {
    pub post_id: i64,
    pub account_id: i64,
    pub screen_name: String,
    pub name: String,
}

/// Borrowed view of one table's buffered rows, handed to a sink.
#[derive(Clone, Copy, Debug)]
pub enum RowSlice<'a> {
    Accounts(&'a [AccountRow]),
    Places(&'a [PlaceRow]),
    Posts(&'a [PostRow]),
    HashtagLinks(&'a [HashtagLink]),
    UrlLinks(&'a [UrlLink]),
    MediaLinks(&'a [MediaLink]),
    MentionLinks(&'a [MentionLink]),
}

impl RowSlice<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            RowSlice::Accounts(_) => EntityKind::Accounts,
            RowSlice::Places(_) => EntityKind::Places,
            RowSlice::Posts(_) => EntityKind::Posts,
            RowSlice::HashtagLinks(_) => EntityKind::HashtagLinks,
            RowSlice::UrlLinks(_) => EntityKind::UrlLinks,
            RowSlice::MediaLinks(_) => EntityKind::MediaLinks,
            RowSlice::MentionLinks(_) => EntityKind::MentionLinks,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowSlice::Accounts(r) => r.len(),
            RowSlice::Places(r) => r.len(),
            RowSlice::Posts(r) => r.len(),
            RowSlice::HashtagLinks(r) => r.len(),
            RowSlice::UrlLinks(r) => r.len(),
            RowSlice::MediaLinks(r) => r.len(),
            RowSlice::MentionLinks(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The seven buffers owned by one worker.
#[derive(Debug, Default)]
pub struct Batches {
    pub accounts: Vec<AccountRow>,
    pub places: Vec<PlaceRow>,
    pub posts: Vec<PostRow>,
    pub hashtag_links: Vec<HashtagLink>,
    pub url_links: Vec<UrlLink>,
    pub media_links: Vec<MediaLink>,
    pub mention_links: Vec<MentionLink>,
}

impl Batches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, kind: EntityKind) -> RowSlice<'_> {
        match kind {
            EntityKind::Accounts => RowSlice::Accounts(&self.accounts),
            EntityKind::Places => RowSlice::Places(&self.places),
            EntityKind::Posts => RowSlice::Posts(&self.posts),
            EntityKind::HashtagLinks => RowSlice::HashtagLinks(&self.hashtag_links),
            EntityKind::UrlLinks => RowSlice::UrlLinks(&self.url_links),
            EntityKind::MediaLinks => RowSlice::MediaLinks(&self.media_links),
            EntityKind::MentionLinks => RowSlice::MentionLinks(&self.mention_links),
        }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.rows(kind).len()
    }

    pub fn clear(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Accounts => self.accounts.clear(),
            EntityKind::Places => self.places.clear(),
            EntityKind::Posts => self.posts.clear(),
            EntityKind::HashtagLinks => self.hashtag_links.clear(),
            EntityKind::UrlLinks => self.url_links.clear(),
            EntityKind::MediaLinks => self.media_links.clear(),
            EntityKind::MentionLinks => self.mention_links.clear(),
        }
    }

    pub fn total_rows(&self) -> usize {
        EntityKind::ALL.iter().map(|k| self.len(*k)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }

    /// Write every buffered row to `path` as NDJSON (`{"table": .., "row": {..}}`).
    /// Returns the number of rows written.
    pub fn dump_residue(&self, path: &Path) -> Result<usize> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut w = NdjsonWriter::create(path, 64 * 1024)
            .with_context(|| format!("create {}", path.display()))?;
        let mut n = 0usize;
        n += write_residue(&mut w, EntityKind::Accounts, &self.accounts)?;
        n += write_residue(&mut w, EntityKind::Places, &self.places)?;
        n += write_residue(&mut w, EntityKind::Posts, &self.posts)?;
        n += write_residue(&mut w, EntityKind::HashtagLinks, &self.hashtag_links)?;
        n += write_residue(&mut w, EntityKind::UrlLinks, &self.url_links)?;
        n += write_residue(&mut w, EntityKind::MediaLinks, &self.media_links)?;
        n += write_residue(&mut w, EntityKind::MentionLinks, &self.mention_links)?;
        w.finish()?;
        Ok(n)
    }
}

fn write_residue<T: Serialize>(w: &mut NdjsonWriter, kind: EntityKind, rows: &[T]) -> Result<usize> {
    for row in rows {
        let line = serde_json::json!({ "table": kind.table(), "row": row });
        w.write_line(&line.to_string())
            .with_context(|| format!("write {}", w.path().display()))?;
    }
    Ok(rows.len())
}

/// Flush every `batch_size` accepted top-level lines.
#[derive(Clone, Copy, Debug)]
pub struct FlushPolicy {
    pub batch_size: usize,
}

impl FlushPolicy {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size: batch_size.max(1) }
    }

    #[inline]
    pub fn should_flush(&self, accepted_lines: u64) -> bool {
        accepted_lines > 0 && accepted_lines % self.batch_size as u64 == 0
    }
}
