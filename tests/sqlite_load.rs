#[path = "common/mod.rs"]
mod common;

use common::*;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tweetload::{apply_schema, table_counts, EntityKind, Ingestor, SqliteSink};

fn ingestor(input: &Path) -> Ingestor {
    Ingestor::new()
        .input_dir(input)
        .batch_size(3)
        .worker_count(4)
        .backoff(Duration::from_millis(5))
        .progress(false)
}

const BUSY: Duration = Duration::from_secs(10);

/// Line 1: post 1 with author 10 and hashtag "Foo". Line 2: post 2 quoting
/// post 1. Post 1 is written once, "foo" gets one dictionary row and one join row.
#[test]
fn end_to_end_example() {
    let dir = temp_dir();
    let input = dir.join("in");
    let db = dir.join("tweets.db");
    write_lines(
        &input.join("a.jsonl"),
        &to_lines(&[
            json!({"id": 1, "user": {"id": 10, "screen_name": "ten"}, "entities": {"hashtags": [{"text": "Foo"}]}}),
            json!({"id": 2, "user": {"id": 20}, "quoted_status": {"id": 1, "user": {"id": 10}, "entities": {"hashtags": [{"text": "Foo"}]}}}),
        ]),
    );

    let summary = ingestor(&input).run_sqlite(&db, BUSY, false).unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.total_lines(), 2);
    assert_eq!(summary.unique_posts, 2);
    assert_eq!(summary.rows_written(EntityKind::Posts), 2);

    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM posts"), 2);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM hashtags WHERE tag = 'foo'"), 1);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM hashtags"), 1);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM post_hashtag"), 1);
    assert_eq!(
        count_rows(&db, "SELECT post_id FROM post_hashtag JOIN hashtags ON hashtags.id = hashtag_id WHERE tag = 'foo'"),
        1
    );
    assert_eq!(count_rows(&db, "SELECT quoted_status_id FROM posts WHERE id = 2"), 1);
}

/// A second load with changed values leaves the latest values in place.
#[test]
fn upserts_keep_the_latest_values() {
    let dir = temp_dir();
    let db = dir.join("tweets.db");

    let first = dir.join("first");
    write_lines(
        &first.join("a.jsonl"),
        &to_lines(&[json!({"id": 1, "text": "old", "retweet_count": 1, "user": {"id": 10, "followers_count": 5}})]),
    );
    ingestor(&first).run_sqlite(&db, BUSY, false).unwrap();

    let second = dir.join("second");
    write_lines(
        &second.join("a.jsonl"),
        &to_lines(&[json!({"id": 1, "text": "new", "retweet_count": 9, "user": {"id": 10, "followers_count": 50}})]),
    );
    ingestor(&second).run_sqlite(&db, BUSY, false).unwrap();

    let conn = rusqlite::Connection::open(&db).unwrap();
    let (text, rts): (String, i64) = conn
        .query_row("SELECT text, retweet_count FROM posts WHERE id = 1", [], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap();
    assert_eq!(text, "new");
    assert_eq!(rts, 9);
    assert_eq!(count_rows(&db, "SELECT followers_count FROM accounts WHERE id = 10"), 50);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM posts"), 1);
}

/// Loading the same input twice does not duplicate join rows.
#[test]
fn join_rows_are_unique_across_reloads() {
    let dir = temp_dir();
    let input = dir.join("in");
    let db = dir.join("tweets.db");
    let mut post = tweet_with_tags(1, 10, &["rust", "Rust"]);
    post["entities"]["urls"] = json!([{"url": "https://t.co/a", "expanded_url": "https://a.example"}]);
    post["entities"]["media"] = json!([{"id": 900, "type": "photo", "media_url": "http://m/900.jpg"}]);
    post["entities"]["user_mentions"] = json!([{"id": 11, "screen_name": "eleven"}]);
    write_lines(&input.join("a.jsonl"), &to_lines(&[post]));

    for _ in 0..2 {
        let summary = ingestor(&input).run_sqlite(&db, BUSY, false).unwrap();
        assert!(summary.is_success());
    }

    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM post_hashtag"), 1);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM post_url"), 1);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM post_media"), 1);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM post_mention"), 1);
}

/// Tags written in different cases by different workers share one id.
#[test]
fn hashtag_case_variants_share_one_dictionary_row() {
    let dir = temp_dir();
    let input = dir.join("in");
    let db = dir.join("tweets.db");
    write_lines(&input.join("a.jsonl"), &to_lines(&[tweet_with_tags(1, 10, &["NASA"])]));
    write_lines(&input.join("b.jsonl"), &to_lines(&[tweet_with_tags(2, 20, &["nasa"])]));
    write_lines(&input.join("c.jsonl"), &to_lines(&[tweet_with_tags(3, 30, &["Nasa"])]));

    let summary = ingestor(&input).run_sqlite(&db, BUSY, false).unwrap();
    assert!(summary.is_success());
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM hashtags"), 1);
    assert_eq!(count_rows(&db, "SELECT COUNT(DISTINCT hashtag_id) FROM post_hashtag"), 1);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM post_hashtag"), 3);
}

/// Many files, many workers, shared posts across files: every post lands once.
#[test]
fn concurrent_workers_load_every_post_once() {
    let dir = temp_dir();
    let input = dir.join("in");
    let db = dir.join("tweets.db");
    for f in 0..6i64 {
        // files overlap by 10 ids with their neighbour
        write_lines(&input.join(format!("part{f}.jsonl")), &tweet_lines(f * 40 + 1, 50));
    }
    write_lines(&input.join("notes.txt"), &["not input".to_string()]);

    let summary = ingestor(&input).run_sqlite(&db, BUSY, false).unwrap();
    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(summary.files.len(), 6);
    assert_eq!(summary.total_lines(), 300);
    assert_eq!(summary.unique_posts, 5 * 40 + 50);
    assert_eq!(summary.total_posts(), 250);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM posts"), 250);
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM accounts"), 7);
}

#[test]
fn schema_reset_drops_existing_rows() {
    let dir = temp_dir();
    let input = dir.join("in");
    let db = dir.join("tweets.db");
    write_lines(&input.join("a.jsonl"), &tweet_lines(1, 4));
    ingestor(&input).run_sqlite(&db, BUSY, false).unwrap();
    assert_eq!(count_rows(&db, "SELECT COUNT(*) FROM posts"), 4);

    let sink = SqliteSink::open(&db, BUSY).unwrap();
    apply_schema(sink.connection(), true).unwrap();
    let counts = table_counts(sink.connection()).unwrap();
    assert_eq!(counts.len(), 8);
    assert!(counts.iter().all(|(_, n)| *n == 0), "{counts:?}");
}
