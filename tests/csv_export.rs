#[path = "common/mod.rs"]
mod common;

use common::*;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io::{self, Write};
use std::time::Duration;
use tweetload::{append_records, Ingestor, PartFile, SinkError};

fn read_csv(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    let header = rdr.headers().unwrap().iter().map(str::to_string).collect();
    let rows = rdr
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}

/// Two input files through the CSV sink: one merged CSV per table with a
/// header, a hashtag dictionary shared across workers, no leftover parts.
#[test]
fn export_merges_parts_into_one_csv_per_table() {
    let dir = temp_dir();
    let input = dir.join("in");
    let out = dir.join("out");
    write_lines(
        &input.join("a.jsonl"),
        &to_lines(&[
            tweet_with_tags(1, 10, &["Rust", "csv"]),
            json!({"id": 2, "text": "with, a comma", "user": {"id": 20}, "place": {"id": "p9", "country": "NL"}}),
        ]),
    );
    // post 1 shows up in both files; whichever worker gets it first, its rows are identical
    write_zst_lines(
        &input.join("b.jsonl.zst"),
        &to_lines(&[tweet_with_tags(3, 10, &["RUST"]), tweet_with_tags(1, 10, &["Rust", "csv"])]),
    );

    let summary = Ingestor::new()
        .input_dir(&input)
        .batch_size(1)
        .worker_count(2)
        .backoff(Duration::ZERO)
        .progress(false)
        .run_csv(&out)
        .unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.unique_posts, 3);
    assert_eq!(summary.outputs.len(), 8);

    let (header, posts) = read_csv(&out.join("posts.csv"));
    assert_eq!(header[0], "id");
    assert_eq!(header.len(), 15);
    let mut ids: Vec<&str> = posts.iter().map(|r| r[0].as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["1", "2", "3"]);
    let commas = posts.iter().find(|r| r[0] == "2").unwrap();
    assert_eq!(commas[2], "with, a comma");

    let (_, places) = read_csv(&out.join("places.csv"));
    assert_eq!(places, vec![vec!["p9".to_string(), String::new(), "NL".to_string(), String::new(), String::new()]]);

    let (dict_header, dict) = read_csv(&out.join("hashtags.csv"));
    assert_eq!(dict_header, vec!["id", "tag"]);
    let mut tags: Vec<&str> = dict.iter().map(|r| r[1].as_str()).collect();
    tags.sort_unstable();
    assert_eq!(tags, vec!["csv", "rust"]);
    let rust_id = dict.iter().find(|r| r[1] == "rust").unwrap()[0].clone();

    let (link_header, links) = read_csv(&out.join("post_hashtag.csv"));
    assert_eq!(link_header, vec!["post_id", "hashtag_id"]);
    assert_eq!(links.len(), 3);
    let rust_posts: Vec<&str> = links.iter().filter(|r| r[1] == rust_id).map(|r| r[0].as_str()).collect();
    assert_eq!(rust_posts.len(), 2, "post 1 and post 3 share the rust id");

    let leftovers: Vec<_> = fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains(".jsonl"))
        .collect();
    assert!(leftovers.is_empty(), "parts not cleaned up: {leftovers:?}");
}

/// Parts left by an interrupted run are discarded instead of merged twice.
#[test]
fn stale_parts_from_an_earlier_run_are_ignored() {
    let dir = temp_dir();
    let input = dir.join("in");
    let out = dir.join("out");
    write_lines(&input.join("a.jsonl"), &tweet_lines(1, 3));
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("a.jsonl.posts.csv"), "999,,stale,,,,,,,,,,0,0,\n").unwrap();

    Ingestor::new().input_dir(&input).progress(false).run_csv(&out).unwrap();

    let (_, posts) = read_csv(&out.join("posts.csv"));
    assert_eq!(posts.len(), 3);
    assert!(posts.iter().all(|r| r[0] != "999"));
}

fn placed(id: i64, user_id: i64, place: &str) -> serde_json::Value {
    json!({"id": id, "text": format!("post {id}"), "user": {"id": user_id}, "place": {"id": place, "country": "NL"}})
}

/// Accounts and places hold one row per id no matter how many posts (or
/// workers) reference them; a url repeated inside one post is one link row.
#[test]
fn repeated_accounts_and_places_are_written_once() {
    let dir = temp_dir();
    let input = dir.join("in");
    let out = dir.join("out");
    let mut first = placed(1, 10, "p1");
    first["entities"] = json!({"urls": [{"url": "https://t.co/x"}, {"url": "https://t.co/x"}]});
    write_lines(&input.join("a.jsonl"), &to_lines(&[first, placed(2, 10, "p1"), placed(3, 10, "p1")]));
    write_lines(&input.join("b.jsonl"), &to_lines(&[placed(4, 10, "p1"), placed(5, 11, "p2")]));

    let summary = Ingestor::new()
        .input_dir(&input)
        .batch_size(1)
        .worker_count(2)
        .backoff(Duration::ZERO)
        .progress(false)
        .run_csv(&out)
        .unwrap();
    assert!(summary.is_success());

    let (_, accounts) = read_csv(&out.join("accounts.csv"));
    let mut ids: Vec<&str> = accounts.iter().map(|r| r[0].as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["10", "11"]);

    let (_, places) = read_csv(&out.join("places.csv"));
    let mut ids: Vec<&str> = places.iter().map(|r| r[0].as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["p1", "p2"]);

    let (_, posts) = read_csv(&out.join("posts.csv"));
    assert_eq!(posts.len(), 5);
    let (_, urls) = read_csv(&out.join("post_url.csv"));
    assert_eq!(urls.len(), 1);
}

/// In-memory part that starts refusing bytes (with a sharing violation) once
/// it holds `limit` bytes.
struct FlakyPart {
    data: Vec<u8>,
    limit: Option<usize>,
}

impl Write for FlakyPart {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(limit) = self.limit else {
            self.data.extend_from_slice(buf);
            return Ok(buf.len());
        };
        if self.data.len() >= limit {
            return Err(io::Error::from_raw_os_error(32));
        }
        let n = buf.len().min(limit - self.data.len());
        self.data.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PartFile for FlakyPart {
    fn committed_len(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.data.truncate(len as usize);
        Ok(())
    }
}

#[derive(Serialize)]
struct Line {
    id: usize,
    text: String,
}

/// A write that fails partway leaves the part as it was, so the retry does
/// not duplicate rows or leave a torn record behind.
#[test]
fn failed_append_is_rolled_back() {
    let rows: Vec<Line> = (0..200).map(|id| Line { id, text: format!("row number {id}") }).collect();
    let mut part = FlakyPart { data: b"0,kept\n".to_vec(), limit: Some(2_000) };

    let err = append_records(&mut part, &rows).unwrap_err();
    assert!(matches!(err, SinkError::Conflict(_)), "{err:?}");
    assert_eq!(part.data, b"0,kept\n");

    part.limit = None;
    assert_eq!(append_records(&mut part, &rows).unwrap(), 200);
    let text = String::from_utf8(part.data).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 201);
    assert_eq!(lines[1], "0,row number 0");
    assert_eq!(lines[200], "199,row number 199");
}
