#[path = "common/mod.rs"]
mod common;

use common::*;
use skyetl::{create_with_backoff, CanonicalStats, LangTag, SkyETL, WriterLock};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn etl_for(c: &Corpus) -> SkyETL {
    SkyETL::new().base_dir(&c.data).out_dir(&c.clean).results_dir(&c.results).progress(false)
}

fn leftover_temp_files(dir: &Path) -> Vec<String> {
    walk_names(dir).into_iter().filter(|n| n.ends_with(".part") || n.ends_with(".lock") || n.ends_with(".tmp")).collect()
}

fn walk_names(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(rd) = fs::read_dir(dir) {
        for e in rd.flatten() {
            let p = e.path();
            if p.is_dir() {
                out.extend(walk_names(&p));
            } else {
                out.push(p.file_name().unwrap().to_string_lossy().to_string());
            }
        }
    }
    out
}

/// Full canonicalization of the two-chunk corpus:
/// - one shard per chunk, named by discovery index;
/// - drop reasons counted separately (1 parse, 1 schema, 1 out of window);
/// - registries written in Id order with the expected first-observation Ids;
/// - replies, reposts and quotes point at the same post Ids their targets received;
/// - no temp or lock files left behind.
#[test]
fn canonicalize_corpus_end_to_end() {
    let c = make_corpus_basic();
    let stats = etl_for(&c).canonicalize().unwrap();

    assert_eq!(stats.total_lines, 8);
    assert_eq!(stats.bad_lines, 1, "one non-JSON line");
    assert_eq!(stats.schema_errors, 1, "one envelope-less line");
    assert_eq!(stats.out_of_window, 1, "one 2022 post");
    assert_eq!(stats.kept, 5);
    assert_eq!(stats.shards_written, 2);
    assert_eq!(stats.failed_shards, 0);
    assert_eq!(stats.minted_users, 3);
    assert_eq!(stats.minted_uris, 5);
    assert_eq!(stats.nulls.post_id, 0);
    assert_eq!(stats.nulls.instance, 4, "only bob.test has a dotted author key");

    let users = read_registry(&c.results.join("enc_users.txt"));
    assert_eq!(
        users,
        vec![(0, "did:plc:A".to_string()), (1, "bob.test".to_string()), (2, "did:plc:C".to_string())],
        "users in first-observation order, bob.test minted by the mention"
    );
    let uris = read_registry(&c.results.join("enc_uris.txt"));
    assert_eq!(uris.len(), 5);
    assert_eq!(uris[0].1, "at://did:plc:A/app.bsky.feed.post/1did:plc:A", "post keys are uri + author");
    assert_eq!(uris[3].1, "at://did:plc:A/app.bsky.feed.post/1did:plc:C", "the repost is keyed by its observer");

    let s0 = read_gz_json(&c.clean.join("0.jsonl.gz"));
    let s1 = read_gz_json(&c.clean.join("1.jsonl.gz"));
    assert_eq!(s0.len(), 2, "chunk_1 keeps A's post and bob's reply");
    assert_eq!(s1.len(), 3, "chunk_2 keeps C's reply, the repost and the quote");

    let a = &s0[0];
    assert_eq!(a["user_id"], 0);
    assert_eq!(a["text"], "hi @1");
    assert!(a["instance"].is_null());
    assert_eq!(a["langs"], serde_json::json!(["EN"]), "no language map: codes pass through");

    let bob = &s0[1];
    assert_eq!(bob["user_id"], 1);
    assert_eq!(bob["instance"], "test");
    assert_eq!(bob["like_count"], 5);
    assert_eq!(bob["labels"], serde_json::json!(["nudity"]));
    assert_eq!(bob["reply_to"], a["post_id"]);
    assert_eq!(bob["thread_root"], a["post_id"]);
    assert_eq!(bob["replied_author"], 0);

    let carol = &s1[0];
    assert_eq!(carol["date"], 202306030800_i64, "wall clock of the +02:00 timestamp");
    assert_eq!(carol["text"], "agreed @1");
    assert_eq!(carol["reply_to"], bob["post_id"]);
    assert_eq!(carol["thread_root"], a["post_id"]);
    assert_eq!(carol["thread_root_author"], 0);

    let repost = &s1[1];
    assert_eq!(repost["user_id"], 2);
    assert_eq!(repost["repost_from"], a["post_id"]);
    assert_eq!(repost["reposted_author"], 0);

    let quote = &s1[2];
    assert_eq!(quote["quotes"], bob["post_id"]);
    assert_eq!(quote["quoted_author"], 1);
    assert_eq!(quote["date"], 202306051200_i64);

    let stats_json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(c.results.join("canonicalize_stats.json")).unwrap()).unwrap();
    assert_eq!(stats_json["kept"], 5);
    assert_eq!(stats_json["nulls"]["instance"], 4);

    assert!(leftover_temp_files(&c.root).is_empty(), "no .part/.lock/.tmp files: {:?}", leftover_temp_files(&c.root));
}

/// With `resume`, chunks whose shard exists are skipped and the saved registries carry
/// over unchanged; a new chunk continues Id assignment where the last run stopped.
#[test]
fn resume_skips_finished_shards_and_continues_ids() {
    let c = make_corpus_basic();
    etl_for(&c).canonicalize().unwrap();
    let users_before = fs::read_to_string(c.results.join("enc_users.txt")).unwrap();

    let again = etl_for(&c).resume(true).canonicalize().unwrap();
    assert_eq!(again.shards_skipped, 2);
    assert_eq!(again.total_lines, 0);
    assert_eq!(fs::read_to_string(c.results.join("enc_users.txt")).unwrap(), users_before);

    write_gz_lines(
        &c.data.join("chunk_3").join("part_1.gz"),
        &[wrapped(None, post_view("at://did:plc:D/app.bsky.feed.post/1", "did:plc:D", "2023-07-01T00:00:00Z", Some("@bob.test hey")))],
    );
    let third = etl_for(&c).resume(true).canonicalize().unwrap();
    assert_eq!(third.shards_skipped, 2);
    assert_eq!(third.shards_written, 1);

    let rows = read_gz_json(&c.clean.join("2.jsonl.gz"));
    assert_eq!(rows[0]["user_id"], 3, "next user after the three saved ones");
    assert_eq!(rows[0]["text"], "@1 hey", "known handles keep their saved id");
    assert_eq!(rows[0]["post_id"], 5);
}

/// A run that stops on an unwritable shard still saves both registries. Resuming once the
/// obstacle is gone assigns exactly the Ids an uninterrupted run would have.
#[test]
fn failed_run_saves_registries_for_resume() {
    let c = make_corpus_basic();
    let blocker = c.clean.join("1.jsonl.gz.part");
    fs::create_dir_all(&blocker).unwrap();

    let err = etl_for(&c).canonicalize().unwrap_err();
    assert!(format!("{err:#}").contains("1.jsonl.gz.part"), "unexpected error: {err:#}");
    assert!(c.clean.join("0.jsonl.gz").exists(), "the first shard was completed before the failure");
    assert_eq!(
        read_registry(&c.results.join("enc_users.txt")),
        vec![(0, "did:plc:A".to_string()), (1, "bob.test".to_string())],
        "ids used by the written shard are on disk"
    );
    assert!(c.results.join("enc_uris.txt").exists());
    assert!(!c.results.join("enc_users.txt.lock").exists(), "locks are released on failure");

    fs::remove_dir(&blocker).unwrap();
    let resumed = etl_for(&c).resume(true).canonicalize().unwrap();
    assert_eq!(resumed.shards_skipped, 1);
    assert_eq!(resumed.shards_written, 1);

    let fresh = make_corpus_basic();
    etl_for(&fresh).canonicalize().unwrap();
    for reg in ["enc_users.txt", "enc_uris.txt"] {
        assert_eq!(read_lines(&c.results.join(reg)), read_lines(&fresh.results.join(reg)), "{reg} differs after resume");
    }
    for shard in ["0.jsonl.gz", "1.jsonl.gz"] {
        assert_eq!(read_gz_lines(&c.clean.join(shard)), read_gz_lines(&fresh.clean.join(shard)), "{shard} differs after resume");
    }
    let s1 = read_gz_json(&c.clean.join("1.jsonl.gz"));
    let user_ids: Vec<u64> = s1.iter().map(|r| r["user_id"].as_u64().unwrap()).collect();
    assert_eq!(user_ids, vec![2, 2, 0], "C is 2 and A is still 0 in the resumed shard");
}

/// Creating a file where a directory stands is a permanent error and is not retried.
#[test]
fn permanent_create_errors_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let started = Instant::now();
    assert!(create_with_backoff(dir.path(), 16, 50).is_err());
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
}

#[derive(Clone, Default)]
struct LogBuf(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `canonicalize` with its log captured; returns the stats and how many times each
/// registry file was saved.
fn canonicalize_counting_saves(etl: &SkyETL) -> (CanonicalStats, usize, usize) {
    let log = LogBuf::default();
    let sink = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || sink.clone())
        .finish();
    let stats = tracing::subscriber::with_default(subscriber, || etl.canonicalize()).unwrap();

    let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
    let saves = |name: &str| text.lines().filter(|l| l.contains("registry saved") && l.contains(name)).count();
    (stats, saves("enc_users.txt"), saves("enc_uris.txt"))
}

/// With `checkpoint_registries`, both registries are rewritten after every completed
/// shard (not after an abandoned one) and once more at the end; without it, only at the end.
#[test]
fn checkpoints_save_registries_after_each_shard() {
    let c = make_corpus_basic();
    add_corrupt_chunk(&c.data);
    let (stats, users, uris) = canonicalize_counting_saves(&etl_for(&c).checkpoint_registries(true));
    assert_eq!((stats.shards_written, stats.failed_shards), (2, 1));
    assert_eq!((users, uris), (3, 3), "two checkpoints plus the final save");

    let plain = make_corpus_basic();
    let (_, users, uris) = canonicalize_counting_saves(&etl_for(&plain));
    assert_eq!((users, uris), (1, 1), "final save only");

    assert_eq!(
        read_lines(&c.results.join("enc_users.txt")),
        read_lines(&plain.results.join("enc_users.txt")),
        "checkpointing does not change the ids"
    );
}

/// Two independent runs over the same input with fresh registries assign identical Ids.
#[test]
fn fresh_runs_are_deterministic() {
    let c = make_corpus_basic();
    etl_for(&c).canonicalize().unwrap();

    let other = c.root.join("second");
    SkyETL::new()
        .base_dir(&c.data)
        .out_dir(other.join("clean"))
        .results_dir(&other)
        .progress(false)
        .canonicalize()
        .unwrap();

    for reg in ["enc_users.txt", "enc_uris.txt"] {
        assert_eq!(
            fs::read_to_string(c.results.join(reg)).unwrap(),
            fs::read_to_string(other.join(reg)).unwrap(),
            "{reg} differs between runs"
        );
    }
    for shard in ["0.jsonl.gz", "1.jsonl.gz"] {
        assert_eq!(read_gz_lines(&c.clean.join(shard)), read_gz_lines(&other.join("clean").join(shard)));
    }
}

/// A chunk that cannot be decoded costs only its own shard: it is counted as failed,
/// leaves no output or temp file, and the other shards are written normally.
#[test]
fn corrupt_chunk_is_skipped_without_output() {
    let c = make_corpus_basic();
    add_corrupt_chunk(&c.data);

    let stats = etl_for(&c).canonicalize().unwrap();
    assert_eq!(stats.failed_shards, 1);
    assert_eq!(stats.shards_written, 2);
    assert_eq!(stats.kept, 5);
    assert!(!c.clean.join("2.jsonl.gz").exists(), "no shard for the corrupt chunk");
    assert!(c.clean.join("0.jsonl.gz").exists() && c.clean.join("1.jsonl.gz").exists());
    assert!(leftover_temp_files(&c.root).is_empty());
}

/// Canonicalization refuses to start while another writer holds a registry.
#[test]
fn canonicalize_respects_registry_lock() {
    let c = make_corpus_basic();
    let _held = WriterLock::acquire(&c.results.join("enc_uris.txt")).unwrap();

    let err = etl_for(&c).canonicalize().unwrap_err();
    assert!(format!("{err:#}").contains("locked"), "unexpected error: {err:#}");
    assert!(!c.clean.join("0.jsonl.gz").exists(), "nothing written while locked");
    assert!(!c.results.join("enc_users.txt.lock").exists(), "the users lock is released on failure");
}

/// A generated language map (lowercased codes numbered from 1) is applied case-insensitively.
#[test]
fn language_map_feeds_canonicalization() {
    let c = make_corpus_basic();
    let etl = etl_for(&c);

    let report = etl.build_language_map().unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.codes, 2);
    let table: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report.path).unwrap()).unwrap();
    assert_eq!(table, serde_json::json!({ "en": 1, "ja": 2 }));

    etl.canonicalize().unwrap();
    let s0 = read_gz_json(&c.clean.join("0.jsonl.gz"));
    let langs: Vec<LangTag> = serde_json::from_value(s0[0]["langs"].clone()).unwrap();
    assert_eq!(langs, vec![LangTag::Id(1)], "`EN` maps through the lowercased `en` entry");
    assert_eq!(s0[1]["langs"], serde_json::json!([2, 1]));
}
