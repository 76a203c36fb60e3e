#![allow(dead_code)]

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Write a gzip file containing the provided lines, like one crawler dump.
pub fn write_gz_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut enc = GzEncoder::new(f, Compression::fast());
    for l in lines {
        writeln!(&mut enc, "{}", l).unwrap();
    }
    enc.finish().unwrap();
}

/// Write a `.zst` file containing the provided lines.
pub fn write_zst_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut enc = zstd::stream::write::Encoder::new(f, 3).unwrap();
    for l in lines {
        writeln!(&mut enc, "{}", l).unwrap();
    }
    enc.finish().unwrap();
}

/// Read a gzip text file line-by-line (skips empty lines).
pub fn read_gz_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    let r = BufReader::new(MultiGzDecoder::new(f));
    r.lines().map(|l| l.unwrap()).filter(|s| !s.is_empty()).collect()
}

/// Read a gzip JSONL file into `serde_json::Value`s.
pub fn read_gz_json(path: &Path) -> Vec<Value> {
    read_gz_lines(path).iter().map(|s| serde_json::from_str(s).unwrap()).collect()
}

/// Read a plain text file line-by-line (skips empty lines).
pub fn read_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    BufReader::new(f).lines().map(|l| l.unwrap()).filter(|s| !s.is_empty()).collect()
}

/// A `{user?, post: {...}}` record as written by the timeline crawler.
pub fn wrapped(user: Option<&str>, post: Value) -> String {
    match user {
        Some(u) => json!({ "user": u, "post": post }).to_string(),
        None => json!({ "post": post }).to_string(),
    }
}

/// Minimal post view: uri, author DID, createdAt and optional text.
pub fn post_view(uri: &str, did: &str, created: &str, text: Option<&str>) -> Value {
    let mut record = json!({ "createdAt": created });
    if let Some(t) = text {
        record["text"] = json!(t);
    }
    json!({ "uri": uri, "author": { "did": did }, "record": record })
}

/// Layout of the synthetic corpus built by [`make_corpus_basic`].
pub struct Corpus {
    pub root: PathBuf,
    pub data: PathBuf,
    pub clean: PathBuf,
    pub results: PathBuf,
}

/// Build a tiny corpus of two chunks under `<root>/data`:
///
/// `chunk_1/part_1.gz`
///   1. A (`did:plc:A`) posts `hi @bob.test` in `["EN"]` (wrapped shape).
///   2. bob.test replies to A's post (flat shape, `record.reply`, authors from the AT-URIs),
///      langs `["ja", "en"]`, `likeCount: 5`, one label object.
///   3. a line that is not JSON.
///   4. JSON without any envelope.
///   5. a 2022 post (before the collection window).
///
/// `chunk_2/part_1.gz`
///   6. C (`did:plc:C`) replies to bob's post inside A's thread (envelope-level `reply`,
///      nested author objects), timestamp with a `+02:00` offset.
///   7. A's post seen in C's timeline (a repost by C).
///   8. A quotes bob's post through a record-with-media embed.
///
/// Expected registries after one canonicalization run:
/// users `A=0, bob.test=1, C=2`; post keys `A/1=0, bob/2=1, C/3=2, A/1 via C=3, A/4=4`.
pub fn make_corpus_basic() -> Corpus {
    let root = tempfile::tempdir().unwrap().into_path();
    let data = root.join("data");

    let a1 = "at://did:plc:A/app.bsky.feed.post/1";
    let b2 = "at://bob.test/app.bsky.feed.post/2";

    let chunk1 = vec![
        wrapped(None, {
            let mut p = post_view(a1, "did:plc:A", "2023-06-01T00:00:00Z", Some("hi @bob.test"));
            p["record"]["langs"] = json!(["EN"]);
            p
        }),
        json!({
            "uri": b2,
            "author": { "did": "bob.test", "handle": "bob.test" },
            "likeCount": 5,
            "labels": [{ "val": "nudity", "src": "did:plc:mod" }],
            "record": {
                "createdAt": "2023-06-02T10:30:00Z",
                "text": "welcome",
                "langs": ["ja", "en"],
                "reply": { "parent": { "uri": a1 }, "root": { "uri": a1 } }
            }
        })
        .to_string(),
        "{ this is not json".to_string(),
        json!({ "kind": "commit", "seq": 12 }).to_string(),
        wrapped(None, post_view("at://did:plc:A/app.bsky.feed.post/0", "did:plc:A", "2022-12-31T23:59:59Z", Some("old"))),
    ];

    let chunk2 = vec![
        json!({
            "post": post_view("at://did:plc:C/app.bsky.feed.post/3", "did:plc:C", "2023-06-03T08:00:00+02:00", Some("agreed @bob.test")),
            "reply": {
                "parent": { "uri": b2, "author": { "did": "bob.test" } },
                "root": { "uri": a1, "author": { "did": "did:plc:A" } }
            }
        })
        .to_string(),
        wrapped(Some("did:plc:C"), post_view(a1, "did:plc:A", "2023-06-01T00:00:00Z", Some("hi @bob.test"))),
        wrapped(None, {
            let mut p = post_view("at://did:plc:A/app.bsky.feed.post/4", "did:plc:A", "2023-06-05T12:00:00.000Z", Some("look"));
            p["embed"] = json!({
                "$type": "app.bsky.embed.recordWithMedia#view",
                "record": { "record": { "uri": b2, "author": { "did": "bob.test" } } },
                "media": {}
            });
            p
        }),
    ];

    write_gz_lines(&data.join("chunk_1").join("part_1.gz"), &chunk1);
    write_gz_lines(&data.join("chunk_2").join("part_1.gz"), &chunk2);

    Corpus { clean: root.join("results").join("clean"), results: root.join("results"), data, root }
}

/// Append a chunk whose only file is not a gzip stream.
pub fn add_corrupt_chunk(data: &Path) -> PathBuf {
    let dir = data.join("chunk_3");
    fs::create_dir_all(&dir).unwrap();
    let p = dir.join("broken.gz");
    fs::write(&p, b"definitely not gzip").unwrap();
    p
}

/// Parse a registry file into `(id, key)` pairs.
pub fn read_registry(path: &Path) -> Vec<(u64, String)> {
    read_lines(path)
        .into_iter()
        .map(|l| {
            let (id, key) = l.split_once(' ').unwrap();
            (id.parse().unwrap(), key.to_string())
        })
        .collect()
}
