//! Thread hypergraph: one hyperedge per thread root, holding every user who posted in the
//! thread (plus the root's author), dated with the root post's own date.

use crate::canonical::{parse_minimal, MinimalPost};
use crate::codec::{for_each_line_with_progress, warn_corrupt_skip, GzLineWriter, StreamEnd};
use crate::config::DatingStrategy;
use crate::paths::discover_shards;
use crate::pipeline::SkyETL;
use crate::progress::maybe_bytes_bar;
use crate::registry::Id;
use crate::util::init_tracing_once;
use ahash::AHashMap;
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperedge {
    pub root: Id,
    /// Date of the root post; `None` when the root post was never seen.
    pub date: Option<i64>,
    /// Ascending.
    pub participants: Vec<Id>,
}

/// Accumulates hyperedges in any arrival order. Roots and participants are kept sorted,
/// so output is deterministic.
#[derive(Debug, Default)]
pub struct HypergraphBuilder {
    edges: BTreeMap<Id, BTreeSet<Id>>,
    dates: AHashMap<Id, i64>,
}

impl HypergraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the post's author and the root's author to the hyperedge of its `thread_root`.
    /// Returns false for posts outside any thread.
    pub fn add_post(&mut self, post: &MinimalPost) -> bool {
        let Some(root) = post.thread_root else { return false };
        let members = self.edges.entry(root).or_default();
        members.extend(post.user_id);
        members.extend(post.thread_root_author);
        true
    }

    /// Remember the post's date. First sighting wins.
    pub fn record_date(&mut self, post: &MinimalPost) {
        if let (Some(id), Some(date)) = (post.post_id, post.date) {
            self.dates.entry(id).or_insert(date);
        }
    }

    /// [`HypergraphBuilder::record_date`] restricted to posts that are a known root.
    pub fn record_root_date(&mut self, post: &MinimalPost) {
        if post.post_id.is_some_and(|id| self.edges.contains_key(&id)) {
            self.record_date(post);
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn participants(&self, root: Id) -> Option<&BTreeSet<Id>> {
        self.edges.get(&root)
    }

    pub fn root_date(&self, root: Id) -> Option<i64> {
        self.dates.get(&root).copied()
    }

    /// Hyperedges in ascending root order.
    pub fn hyperedges(&self) -> impl Iterator<Item = Hyperedge> + '_ {
        self.edges.iter().map(|(&root, members)| Hyperedge {
            root,
            date: self.root_date(root),
            participants: members.iter().copied().collect(),
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct HypergraphStats {
    pub shards: u64,
    pub failed_shards: u64,
    /// Lines read in the participant pass.
    pub lines: u64,
    pub bad_lines: u64,
    pub thread_posts: u64,
    pub hyperedges: u64,
    /// Hyperedges whose root post never appeared in the shards.
    pub undated: u64,
}

impl SkyETL {
    /// Build the thread hypergraph from the canonical shards and write
    /// `hypergraph.tsv.gz` (`root \t date \t p1,p2,...`) to `results_dir`.
    pub fn extract_hypergraph(&self) -> Result<HypergraphStats> {
        init_tracing_once();
        let shards = discover_shards(&self.opts.out_dir);
        if shards.is_empty() {
            tracing::warn!(dir = %self.opts.out_dir.display(), "no canonical shards found");
        }
        let dating = self.opts.dating;
        tracing::info!(shards = shards.len(), ?dating, "building hypergraph");

        let mut builder = HypergraphBuilder::new();
        let mut stats = HypergraphStats::default();
        let mut thread_posts = 0u64;

        self.scan_minimal(&shards, "Hypergraph", &mut stats, |post| {
            if builder.add_post(post) {
                thread_posts += 1;
            }
            if dating == DatingStrategy::InMemory {
                builder.record_date(post);
            }
        })?;

        stats.thread_posts = thread_posts;

        if dating == DatingStrategy::TwoPass {
            let mut second = HypergraphStats::default();
            self.scan_minimal(&shards, "Hypergraph (dates)", &mut second, |post| builder.record_root_date(post))?;
        }

        let out = self.results_file("hypergraph.tsv.gz")?;
        let mut w = GzLineWriter::create(&out, self.opts.write_buffer_bytes, self.opts.compression_level)?;
        let mut line = String::with_capacity(128);
        for edge in builder.hyperedges() {
            line.clear();
            let _ = write!(line, "{}\t", edge.root);
            match edge.date {
                Some(d) => {
                    let _ = write!(line, "{d}");
                }
                None => stats.undated += 1,
            }
            line.push('\t');
            for (i, p) in edge.participants.iter().enumerate() {
                if i > 0 {
                    line.push(',');
                }
                let _ = write!(line, "{p}");
            }
            w.write_line(&line)?;
            stats.hyperedges += 1;
        }
        w.finish_atomic()?;

        tracing::info!(
            lines = stats.lines,
            bad = stats.bad_lines,
            hyperedges = stats.hyperedges,
            undated = stats.undated,
            path = %out.display(),
            "hypergraph written"
        );
        Ok(stats)
    }

    /// Stream every shard as [`MinimalPost`]s, counting lines and bad lines in `stats`.
    fn scan_minimal(
        &self,
        shards: &[PathBuf],
        fallback_label: &str,
        stats: &mut HypergraphStats,
        mut on_post: impl FnMut(&MinimalPost),
    ) -> Result<()> {
        let pb = maybe_bytes_bar(self.opts.progress, shards, self.opts.progress_label.as_deref(), fallback_label);
        for shard in shards {
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
                    match parse_minimal(raw) {
                        Ok(post) => on_post(&post),
                        Err(_) => stats.bad_lines += 1,
                    }
                    Ok(())
                },
            )?;
            stats.shards += 1;
            if let StreamEnd::Corrupt(e) = end {
                warn_corrupt_skip(shard, &e);
                stats.failed_shards += 1;
            }
        }
        if let Some(pb) = pb {
            pb.finish_with_message("scanned");
        }
        Ok(())
    }
}
