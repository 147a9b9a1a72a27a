#[path = "common/mod.rs"]
mod common;

use common::*;
use std::time::Duration;
use tweetload::{
    decode_post, flatten, Batches, DedupIndex, DrainError, EntityKind, RetryPolicy, RetryingWriter, SinkError,
    WriteOutcome,
};

fn writer(retry_limit: u32, drain_attempts: u32) -> RetryingWriter {
    RetryingWriter::new(RetryPolicy { retry_limit, backoff: Duration::ZERO, drain_attempts })
}

fn batches_with_tagged_posts(n: i64) -> Batches {
    let index = DedupIndex::new();
    let mut batches = Batches::new();
    for id in 1..=n {
        let v = tweet_with_tags(id, 100 + id, &["Tag"]);
        flatten(decode_post(&v.to_string()).unwrap(), &index, &mut batches);
    }
    batches
}

#[test]
fn conflicts_are_retried_until_the_write_lands() {
    let mut sink = ScriptedSink::new();
    sink.fail_next(Some(EntityKind::Accounts), SinkError::Conflict("busy".into()), 2);
    let batches = batches_with_tagged_posts(3);

    let outcome = writer(3, 1).write_with_retry(&mut sink, batches.rows(EntityKind::Accounts));
    assert!(matches!(outcome, WriteOutcome::Written(3)), "got {outcome:?}");
    assert_eq!(sink.attempts(), 3);
}

#[test]
fn retry_limit_bounds_the_attempts() {
    let mut sink = ScriptedSink::always_failing(SinkError::Conflict("busy".into()));
    let batches = batches_with_tagged_posts(1);

    let outcome = writer(4, 1).write_with_retry(&mut sink, batches.rows(EntityKind::Posts));
    match outcome {
        WriteOutcome::GaveUp { attempts, error } => {
            assert_eq!(attempts, 4);
            assert!(error.is_retryable());
        }
        other => panic!("expected GaveUp, got {other:?}"),
    }
    assert_eq!(sink.attempts(), 4);
}

#[test]
fn fatal_errors_are_not_retried() {
    let mut sink = ScriptedSink::always_failing(SinkError::Fatal("disk gone".into()));
    let batches = batches_with_tagged_posts(1);

    let outcome = writer(5, 1).write_with_retry(&mut sink, batches.rows(EntityKind::Posts));
    assert!(matches!(outcome, WriteOutcome::GaveUp { attempts: 1, .. }));
    assert_eq!(sink.attempts(), 1);
}

/// Posts failing for a round keeps the join rows out of that round; both go
/// out together in the next one.
#[test]
fn failed_posts_hold_back_join_tables() {
    let mut sink = ScriptedSink::new();
    sink.fail_next(Some(EntityKind::Posts), SinkError::Conflict("busy".into()), 1);
    let mut batches = batches_with_tagged_posts(2);
    let w = writer(1, 1);

    let first = w.flush(&mut sink, &mut batches);
    assert_eq!(first.failed, vec![EntityKind::Posts]);
    assert_eq!(first.skipped, vec![EntityKind::HashtagLinks]);
    assert!(!first.is_complete());
    assert_eq!(batches.len(EntityKind::Accounts), 0, "successful tables are cleared");
    assert_eq!(batches.len(EntityKind::Posts), 2);
    assert_eq!(batches.len(EntityKind::HashtagLinks), 2);
    assert!(sink.writes_for(EntityKind::HashtagLinks).is_empty());

    let second = w.flush(&mut sink, &mut batches);
    assert!(second.is_complete());
    assert!(batches.is_empty());
    assert_eq!(sink.writes_for(EntityKind::Posts), vec![2]);
    assert_eq!(sink.writes_for(EntityKind::HashtagLinks), vec![2]);
}

#[test]
fn drain_retries_whole_rounds_until_empty() {
    let mut sink = ScriptedSink::new();
    sink.fail_next(Some(EntityKind::Posts), SinkError::Conflict("busy".into()), 3);
    let mut batches = batches_with_tagged_posts(4);

    let report = writer(1, 10).drain(&mut sink, &mut batches).unwrap();
    assert_eq!(report.rounds, 4);
    assert!(batches.is_empty());
    assert_eq!(report.written[EntityKind::Posts.index()], 4);
    assert_eq!(report.written[EntityKind::HashtagLinks.index()], 4);
}

#[test]
fn drain_gives_up_after_its_attempts_and_keeps_the_residue() {
    let mut sink = ScriptedSink::always_failing(SinkError::Conflict("busy".into()));
    let mut batches = batches_with_tagged_posts(3);
    let before = batches.total_rows();

    let err = writer(2, 3).drain(&mut sink, &mut batches).unwrap_err();
    match &err {
        DrainError::Exhausted { rounds, residue, last_error, .. } => {
            assert_eq!(*rounds, 3);
            assert_eq!(*residue, before);
            assert!(last_error.as_ref().is_some_and(|e| e.is_retryable()));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(batches.total_rows(), before);
    // accounts and posts, two attempts each, three rounds; joins never attempted
    assert_eq!(sink.attempts(), 3 * 2 * 2);
}

#[test]
fn drain_stops_at_the_first_fatal_error() {
    let mut sink = ScriptedSink::new();
    sink.fail_next(Some(EntityKind::Posts), SinkError::Fatal("constraint".into()), 1);
    let mut batches = batches_with_tagged_posts(2);

    let err = writer(3, 30).drain(&mut sink, &mut batches).unwrap_err();
    assert!(matches!(err, DrainError::Fatal { .. }));
    assert_eq!(err.residue(), batches.total_rows());
    assert_eq!(err.written()[EntityKind::Accounts.index()], 2);
}
