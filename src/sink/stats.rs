//! Counting sink: writes nothing, tracks the distinct rows every table would hold.

use super::{Sink, SinkError};
use crate::batch::{EntityKind, RowSlice};
use ahash::AHashSet;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Distinct {
    accounts: AHashSet<i64>,
    places: AHashSet<String>,
    posts: AHashSet<i64>,
    hashtags: AHashSet<String>,
    hashtag_links: AHashSet<(i64, String)>,
    url_links: AHashSet<(i64, String)>,
    media_links: AHashSet<(i64, i64)>,
    mention_links: AHashSet<(i64, i64)>,
}

/// Shared by every [`StatsSink`] handle of one run.
#[derive(Debug, Default)]
pub struct EntityStats {
    inner: Mutex<Distinct>,
}

impl EntityStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        let d = self.inner.lock();
        match kind {
            EntityKind::Accounts => d.accounts.len(),
            EntityKind::Places => d.places.len(),
            EntityKind::Posts => d.posts.len(),
            EntityKind::HashtagLinks => d.hashtag_links.len(),
            EntityKind::UrlLinks => d.url_links.len(),
            EntityKind::MediaLinks => d.media_links.len(),
            EntityKind::MentionLinks => d.mention_links.len(),
        }
    }

    pub fn distinct_hashtags(&self) -> usize {
        self.inner.lock().hashtags.len()
    }

    /// `(table, distinct rows)` in write order, then `hashtags`.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        let mut out: Vec<(&'static str, usize)> = EntityKind::ALL.iter().map(|k| (k.table(), self.count(*k))).collect();
        out.push(("hashtags", self.distinct_hashtags()));
        out
    }

    fn record(&self, rows: RowSlice<'_>) -> usize {
        let mut d = self.inner.lock();
        match rows {
            RowSlice::Accounts(r) => d.accounts.extend(r.iter().map(|a| a.id)),
            RowSlice::Places(r) => d.places.extend(r.iter().map(|p| p.id.clone())),
            RowSlice::Posts(r) => d.posts.extend(r.iter().map(|p| p.id)),
            RowSlice::HashtagLinks(r) => {
                for link in r {
                    d.hashtags.insert(link.tag.clone());
                    d.hashtag_links.insert((link.post_id, link.tag.clone()));
                }
            }
            RowSlice::UrlLinks(r) => d.url_links.extend(r.iter().map(|u| (u.post_id, u.url.clone()))),
            RowSlice::MediaLinks(r) => d.media_links.extend(r.iter().map(|m| (m.post_id, m.media_id))),
            RowSlice::MentionLinks(r) => d.mention_links.extend(r.iter().map(|m| (m.post_id, m.account_id))),
        }
        rows.len()
    }
}

#[derive(Clone)]
pub struct StatsSink {
    stats: Arc<EntityStats>,
}

impl StatsSink {
    pub fn new(stats: Arc<EntityStats>) -> Self {
        Self { stats }
    }
}

impl Sink for StatsSink {
    fn write(&mut self, rows: RowSlice<'_>) -> Result<usize, SinkError> {
        Ok(self.stats.record(rows))
    }
}
