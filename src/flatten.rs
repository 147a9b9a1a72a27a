//! Turns one decoded post, plus every post it embeds, into flat rows.
//!
//! Traversal uses an explicit stack, so nesting depth is bounded by memory and
//! not by the call stack. Every post passes through the dedup index before any
//! of its rows are produced; a post seen before is skipped together with
//! everything reachable from it.

use crate::batch::{AccountRow, Batches, HashtagLink, MediaLink, MentionLink, PlaceRow, PostRow, UrlLink};
use crate::decode::to_rfc3339;
use crate::dedup::DedupIndex;
use crate::model::Post;

/// Outcome of flattening one top-level record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlattenStats {
    /// Posts (top-level or embedded) turned into rows.
    pub accepted: u64,
    /// Posts skipped because their id was already in the index.
    pub duplicates: u64,
}

/// Case-fold a hashtag so `NASA` and `nasa` land on one dictionary entry.
pub fn normalize_hashtag(text: &str) -> String {
    text.trim().to_lowercase()
}

pub fn flatten(post: Post, index: &DedupIndex, batches: &mut Batches) -> FlattenStats {
    let mut stats = FlattenStats::default();
    let mut pending: Vec<Post> = vec![post];

    while let Some(mut post) = pending.pop() {
        if !index.test_and_insert(post.id) {
            stats.duplicates += 1;
            continue;
        }
        stats.accepted += 1;

        let quoted = post.quoted_status.take();
        let retweeted = post.retweeted_status.take();
        let quoted_id = post.quoted_status_id.or(quoted.as_ref().map(|q| q.id));
        let retweeted_id = retweeted.as_ref().map(|r| r.id);

        append_post(post, quoted_id, retweeted_id, batches);

        // Stack order: quoted is popped before retweeted.
        if let Some(r) = retweeted {
            pending.push(*r);
        }
        if let Some(q) = quoted {
            pending.push(*q);
        }
    }
    stats
}

fn append_post(mut post: Post, quoted_id: Option<i64>, retweeted_id: Option<i64>, batches: &mut Batches) {
    let post_id = post.id;
    let text = match post.full_text.take() {
        Some(full) if !full.is_empty() => full,
        _ => std::mem::take(&mut post.text),
    };
    let user = post.user.take();
    let place = post.place.take();
    let entities = post.entities.take();
    let display_text_range = post.display_text_range;
    let user_id = user.as_ref().map(|u| u.id);
    let place_id = place.as_ref().map(|p| p.id.clone());

    if let Some(user) = user {
        batches.accounts.push(AccountRow::from(user));
    }
    if let Some(place) = place {
        batches.places.push(PlaceRow::from(place));
    }

    batches.posts.push(PostRow {
        id: post_id,
        created_at: to_rfc3339(&post.created_at),
        text,
        display_from: display_text_range.map(|(from, _)| from),
        display_to: display_text_range.map(|(_, to)| to),
        lang: post.lang,
        user_id,
        source: post.source,
        in_reply_to_status_id: post.in_reply_to_status_id,
        quoted_status_id: quoted_id,
        retweeted_status_id: retweeted_id,
        place_id,
        retweet_count: post.retweet_count,
        favorite_count: post.favorite_count,
        possibly_sensitive: post.possibly_sensitive,
    });

    let Some(entities) = entities else { return };

    for h in entities.hashtags {
        let tag = normalize_hashtag(&h.text);
        if tag.is_empty() {
            continue;
        }
        batches.hashtag_links.push(HashtagLink { post_id, tag });
    }
    for u in entities.urls {
        let unwound = u.unwound_url;
        batches.url_links.push(UrlLink {
            post_id,
            url: u.url,
            expanded_url: u.expanded_url,
            display_url: u.display_url,
            unwound_status: unwound.as_ref().and_then(|w| w.status),
            unwound_title: unwound.as_ref().map(|w| w.title.clone()),
            unwound_description: unwound.as_ref().map(|w| w.description.clone()),
            unwound_url: unwound.map(|w| w.url),
        });
    }
    for m in entities.media {
        batches.media_links.push(MediaLink {
            post_id,
            media_id: m.id,
            kind: m.kind,
            media_url: m.media_url,
            media_url_https: m.media_url_https,
            display_url: m.display_url,
            expanded_url: m.expanded_url,
        });
    }
    for um in entities.user_mentions {
        batches.mention_links.push(MentionLink {
            post_id,
            account_id: um.id,
            screen_name: um.screen_name,
            name: um.name,
        });
    }
}
