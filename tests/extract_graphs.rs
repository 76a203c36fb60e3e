#[path = "common/mod.rs"]
mod common;

use common::*;
use skyetl::{edges_of, DatingStrategy, HypergraphBuilder, InteractionEdge, InteractionKind, MinimalPost, SkyETL};
use std::fs;

fn canonicalized() -> (Corpus, SkyETL) {
    let c = make_corpus_basic();
    let etl = SkyETL::new().base_dir(&c.data).out_dir(&c.clean).results_dir(&c.results).progress(false);
    etl.canonicalize().unwrap();
    (c, etl)
}

/// Interaction extraction over the canonical corpus writes the wide table plus one
/// `source,target,date` file per kind, with day-truncated dates.
#[test]
fn interactions_from_canonical_shards() {
    let (c, etl) = canonicalized();
    let stats = etl.extract_interactions().unwrap();

    assert_eq!(stats.lines, 5);
    assert_eq!(stats.bad_lines, 0);
    assert_eq!(stats.rows, 4, "A's own post has no interaction");
    assert_eq!((stats.replies, stats.thread_roots, stats.reposts, stats.quotes), (2, 2, 1, 1));
    assert_eq!(stats.edges(), 6);

    assert_eq!(
        read_gz_lines(&c.results.join("interactions.csv.gz")),
        vec![
            "source,reply_target,root_target,repost_target,quote_target,date",
            "1,0,0,,,202306021030",
            "2,1,0,,,202306030800",
            "2,,,0,,202306010000",
            "0,,,,1,202306051200",
        ]
    );
    assert_eq!(
        read_gz_lines(&c.results.join("replies.csv.gz")),
        vec!["source,target,date", "1,0,20230602", "2,1,20230603"]
    );
    assert_eq!(
        read_gz_lines(&c.results.join("thread_roots.csv.gz")),
        vec!["source,target,date", "1,0,20230602", "2,0,20230603"]
    );
    assert_eq!(read_gz_lines(&c.results.join("reposts.csv.gz")), vec!["source,target,date", "2,0,20230601"]);
    assert_eq!(read_gz_lines(&c.results.join("quotes.csv.gz")), vec!["source,target,date", "0,1,20230605"]);
}

/// User 0 is a valid target; posts without a user produce no edges; an unknown date
/// becomes `00000000` in the per-kind files.
#[test]
fn interaction_edges_edge_cases() {
    let p = MinimalPost { user_id: Some(3), replied_author: Some(0), date: Some(202306011200), ..Default::default() };
    assert_eq!(
        edges_of(&p),
        vec![InteractionEdge { kind: InteractionKind::Reply, source: 3, target: 0, date: Some(202306011200) }]
    );
    let orphan = MinimalPost { replied_author: Some(1), quoted_author: Some(2), ..Default::default() };
    assert!(edges_of(&orphan).is_empty());

    let dir = tempfile::tempdir().unwrap();
    let clean = dir.path().join("clean");
    write_gz_lines(
        &clean.join("0.jsonl.gz"),
        &[
            r#"{"post_id":1,"user_id":4,"date":null,"quoted_author":0}"#.to_string(),
            r#"{"post_id":2,"user_id":null,"reposted_author":4}"#.to_string(),
            "garbage".to_string(),
        ],
    );
    let stats = SkyETL::new().out_dir(&clean).results_dir(dir.path()).progress(false).extract_interactions().unwrap();
    assert_eq!(stats.no_user, 1);
    assert_eq!(stats.bad_lines, 1);
    assert_eq!(read_gz_lines(&dir.path().join("quotes.csv.gz")), vec!["source,target,date", "4,0,00000000"]);
    assert_eq!(read_gz_lines(&dir.path().join("interactions.csv.gz"))[1], "4,,,,0,");
}

/// Three posts in thread 42 by users 1, 2 and 3 give exactly {1,2,3}, whatever the
/// order they arrive in.
#[test]
fn hyperedge_is_complete_in_any_order() {
    let posts = [
        MinimalPost { post_id: Some(100), user_id: Some(1), thread_root: Some(42), ..Default::default() },
        MinimalPost { post_id: Some(101), user_id: Some(2), thread_root: Some(42), ..Default::default() },
        MinimalPost { post_id: Some(102), user_id: Some(3), thread_root: Some(42), ..Default::default() },
    ];
    let orders: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in orders {
        let mut b = HypergraphBuilder::new();
        for i in order {
            assert!(b.add_post(&posts[i]));
        }
        let edges: Vec<_> = b.hyperedges().collect();
        assert_eq!(edges.len(), 1, "one hyperedge for one root");
        assert_eq!(edges[0].root, 42);
        assert_eq!(edges[0].participants, vec![1, 2, 3], "order {order:?}");
        assert_eq!(edges[0].date, None, "root post never seen");
    }

    let mut b = HypergraphBuilder::new();
    assert!(!b.add_post(&MinimalPost { post_id: Some(42), user_id: Some(9), date: Some(202301010000), ..Default::default() }));
    assert!(b.is_empty(), "a post outside any thread creates no hyperedge");
}

/// The hypergraph file carries the root post's own date, whichever dating strategy runs.
#[test]
fn hypergraph_file_with_both_dating_strategies() {
    let (c, etl) = canonicalized();

    let stats = etl.clone().dating(DatingStrategy::InMemory).extract_hypergraph().unwrap();
    assert_eq!(stats.hyperedges, 1);
    assert_eq!(stats.thread_posts, 2);
    assert_eq!(stats.undated, 0);
    let in_memory = read_gz_lines(&c.results.join("hypergraph.tsv.gz"));
    assert_eq!(in_memory, vec!["0\t202306010000\t0,1,2"], "root 0 (A's post) with A, bob and C");

    fs::remove_file(c.results.join("hypergraph.tsv.gz")).unwrap();
    let two_pass = etl.dating(DatingStrategy::TwoPass).extract_hypergraph().unwrap();
    assert_eq!(two_pass, stats);
    assert_eq!(read_gz_lines(&c.results.join("hypergraph.tsv.gz")), in_memory);
}

/// A thread whose root post was never canonicalized keeps an empty date column.
#[test]
fn hypergraph_undated_root() {
    let dir = tempfile::tempdir().unwrap();
    let clean = dir.path().join("clean");
    write_gz_lines(
        &clean.join("0.jsonl.gz"),
        &[
            r#"{"post_id":5,"user_id":2,"date":202306011000,"thread_root":9,"thread_root_author":7}"#.to_string(),
            r#"{"post_id":6,"user_id":1,"date":202306011100,"thread_root":9}"#.to_string(),
        ],
    );
    let stats = SkyETL::new()
        .out_dir(&clean)
        .results_dir(dir.path())
        .dating(DatingStrategy::TwoPass)
        .progress(false)
        .extract_hypergraph()
        .unwrap();
    assert_eq!(stats.undated, 1);
    assert_eq!(read_gz_lines(&dir.path().join("hypergraph.tsv.gz")), vec!["9\t\t1,2,7"]);
}
