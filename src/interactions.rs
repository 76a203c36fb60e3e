//! Interaction edges: who replied to, reposted or quoted whom, read from the canonical
//! shards. Read-only; no Ids are minted here.

use crate::canonical::{parse_minimal, MinimalPost};
use crate::codec::{for_each_line_with_progress, warn_corrupt_skip, GzLineWriter, StreamEnd};
use crate::date::day_string;
use crate::paths::discover_shards;
use crate::pipeline::SkyETL;
use crate::progress::maybe_bytes_bar;
use crate::registry::Id;
use crate::util::init_tracing_once;
use anyhow::Result;
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InteractionKind {
    Reply,
    ThreadRoot,
    Repost,
    Quote,
}

impl InteractionKind {
    pub const ALL: [InteractionKind; 4] =
        [InteractionKind::Reply, InteractionKind::ThreadRoot, InteractionKind::Repost, InteractionKind::Quote];

    /// Per-kind edge list written by [`SkyETL::extract_interactions`].
    pub fn file_name(self) -> &'static str {
        match self {
            InteractionKind::Reply => "replies.csv.gz",
            InteractionKind::ThreadRoot => "thread_roots.csv.gz",
            InteractionKind::Repost => "reposts.csv.gz",
            InteractionKind::Quote => "quotes.csv.gz",
        }
    }

    fn target(self, p: &MinimalPost) -> Option<Id> {
        match self {
            InteractionKind::Reply => p.replied_author,
            InteractionKind::ThreadRoot => p.thread_root_author,
            InteractionKind::Repost => p.reposted_author,
            InteractionKind::Quote => p.quoted_author,
        }
    }
}

/// `source` user interacted with `target` user at `date` (`YYYYMMDDHHMM`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InteractionEdge {
    pub kind: InteractionKind,
    pub source: Id,
    pub target: Id,
    pub date: Option<i64>,
}

/// One edge per non-null `*_author` field; nothing when the post has no `user_id`.
pub fn edges_of(post: &MinimalPost) -> Vec<InteractionEdge> {
    let Some(source) = post.user_id else { return Vec::new() };
    InteractionKind::ALL
        .iter()
        .filter_map(|&kind| kind.target(post).map(|target| InteractionEdge { kind, source, target, date: post.date }))
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionStats {
    pub shards: u64,
    pub failed_shards: u64,
    pub lines: u64,
    pub bad_lines: u64,
    /// Posts skipped because they carry no `user_id`.
    pub no_user: u64,
    /// Rows in the wide file (posts with at least one edge).
    pub rows: u64,
    pub replies: u64,
    pub thread_roots: u64,
    pub reposts: u64,
    pub quotes: u64,
}

impl InteractionStats {
    fn count(&mut self, kind: InteractionKind) {
        match kind {
            InteractionKind::Reply => self.replies += 1,
            InteractionKind::ThreadRoot => self.thread_roots += 1,
            InteractionKind::Repost => self.reposts += 1,
            InteractionKind::Quote => self.quotes += 1,
        }
    }

    pub fn edges(&self) -> u64 {
        self.replies + self.thread_roots + self.reposts + self.quotes
    }
}

fn cell(v: Option<Id>) -> String {
    v.map(|id| id.to_string()).unwrap_or_default()
}

/// The five writers of one extraction run.
struct EdgeSinks {
    wide: GzLineWriter,
    per_kind: Vec<(InteractionKind, GzLineWriter)>,
}

impl EdgeSinks {
    fn write_post(&mut self, post: &MinimalPost, edges: &[InteractionEdge], line: &mut String) -> Result<()> {
        line.clear();
        let _ = write!(
            line,
            "{},{},{},{},{},{}",
            cell(post.user_id),
            cell(post.replied_author),
            cell(post.thread_root_author),
            cell(post.reposted_author),
            cell(post.quoted_author),
            post.date.map(|d| d.to_string()).unwrap_or_default()
        );
        self.wide.write_line(line)?;

        let day = day_string(post.date);
        for e in edges {
            if let Some((_, w)) = self.per_kind.iter_mut().find(|(k, _)| *k == e.kind) {
                line.clear();
                let _ = write!(line, "{},{},{}", e.source, e.target, day);
                w.write_line(line)?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        self.wide.finish_atomic()?;
        for (_, w) in self.per_kind {
            w.finish_atomic()?;
        }
        Ok(())
    }
}

impl SkyETL {
    /// Scan every canonical shard in `out_dir` and write the interaction edge lists to
    /// `results_dir`: the wide `interactions.csv.gz` plus one `source,target,date` file per
    /// kind. Outputs appear only once the whole scan has succeeded.
    pub fn extract_interactions(&self) -> Result<InteractionStats> {
        init_tracing_once();
        let shards = discover_shards(&self.opts.out_dir);
        if shards.is_empty() {
            tracing::warn!(dir = %self.opts.out_dir.display(), "no canonical shards found");
        }

        let (buf, level) = (self.opts.write_buffer_bytes, self.opts.compression_level);
        let mut wide = GzLineWriter::create(&self.results_file("interactions.csv.gz")?, buf, level)?;
        wide.write_line("source,reply_target,root_target,repost_target,quote_target,date")?;
        let mut per_kind = Vec::with_capacity(InteractionKind::ALL.len());
        for kind in InteractionKind::ALL {
            let mut w = GzLineWriter::create(&self.results_file(kind.file_name())?, buf, level)?;
            w.write_line("source,target,date")?;
            per_kind.push((kind, w));
        }
        let mut sinks = EdgeSinks { wide, per_kind };

        let pb = maybe_bytes_bar(self.opts.progress, &shards, self.opts.progress_label.as_deref(), "Interactions");
        let mut stats = InteractionStats::default();
        let mut line = String::with_capacity(96);

        for shard in &shards {
            let end = for_each_line_with_progress(
                shard,
                self.opts.read_buffer_bytes,
                |delta| {
                    if let Some(pb) = &pb {
                        pb.inc(delta);
                    }
                },
                |raw| {
                    stats.lines += 1;
                    let Ok(post) = parse_minimal(raw) else {
                        stats.bad_lines += 1;
                        return Ok(());
                    };
                    if post.user_id.is_none() {
                        stats.no_user += 1;
                        return Ok(());
                    }
                    let edges = edges_of(&post);
                    if edges.is_empty() {
                        return Ok(());
                    }
                    for e in &edges {
                        stats.count(e.kind);
                    }
                    stats.rows += 1;
                    sinks.write_post(&post, &edges, &mut line)
                },
            )?;
            stats.shards += 1;
            if let StreamEnd::Corrupt(e) = end {
                warn_corrupt_skip(shard, &e);
                stats.failed_shards += 1;
            }
        }
        if let Some(pb) = pb {
            pb.finish_with_message("interactions extracted");
        }

        sinks.finish()?;
        tracing::info!(
            shards = stats.shards,
            lines = stats.lines,
            bad = stats.bad_lines,
            no_user = stats.no_user,
            replies = stats.replies,
            thread_roots = stats.thread_roots,
            reposts = stats.reposts,
            quotes = stats.quotes,
            "interactions extracted"
        );
        Ok(stats)
    }
}

