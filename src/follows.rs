//! Follow graph: crawler adjacency lists joined into `follower,followed` DID pairs, and
//! those pairs rewritten to user Ids.

use crate::codec::{for_each_line_with_progress, warn_corrupt_skip, GzLineWriter, StreamEnd};
use crate::paths::discover_named;
use crate::pipeline::SkyETL;
use crate::progress::maybe_bytes_bar;
use crate::registry::{Id, Registry, WriterLock};
use crate::util::init_tracing_once;
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::SplitAsciiWhitespace;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FollowStats {
    pub lines: u64,
    /// Lines without exactly two usable fields.
    pub bad_lines: u64,
    pub edges_read: u64,
    /// Distinct edges written.
    pub edges_written: u64,
    pub minted_users: u64,
    pub corrupt_input: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FollowJoinStats {
    pub follows_files: u64,
    pub followers_files: u64,
    /// Files that failed to decode; edges read before the failure are kept.
    pub corrupt_files: u64,
    pub lines: u64,
    /// Accounts listed without any neighbour.
    pub no_neighbours: u64,
    /// Lines that are not UTF-8.
    pub bad_lines: u64,
    pub edges: u64,
}

/// Which way an adjacency list points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ListKind {
    /// `account \t followed...`
    Follows,
    /// `account \t follower...`; edges are reversed.
    Followers,
}

/// `account \t n1 n2 ...` -> `(account, [n1, n2, ...])`; `None` without neighbours.
fn split_adjacency(line: &str) -> Option<(&str, SplitAsciiWhitespace<'_>)> {
    let (account, rest) = line.trim_end().split_once('\t')?;
    let account = account.trim();
    if account.is_empty() || rest.trim().is_empty() {
        return None;
    }
    Some((account, rest.split_ascii_whitespace()))
}

/// `a,b` -> `(a, b)` when both fields are non-empty identifiers.
fn split_pair(line: &str) -> Option<(&str, &str)> {
    let mut it = line.split(',');
    let (Some(a), Some(b), None) = (it.next(), it.next(), it.next()) else { return None };
    let ok = |s: &str| !s.is_empty() && !s.contains(|c: char| c.is_ascii_whitespace());
    let (a, b) = (a.trim(), b.trim());
    (ok(a) && ok(b)).then_some((a, b))
}

impl SkyETL {
    /// Join the crawler's adjacency lists in `input_dir` into one gzip CSV of
    /// `follower,followed` DID pairs, the input of [`SkyETL::encode_follow_edges`].
    ///
    /// `follows_*.txt` lines (`account \t followed...`) give `account,followed`;
    /// `followers_*.txt` lines (`account \t follower...`) give `follower,account`.
    /// Follows files are read first, each group in name order. Duplicates are kept.
    pub fn join_follow_lists(&self, input_dir: &Path, output: &Path) -> Result<FollowJoinStats> {
        init_tracing_once();
        let follows = discover_named(input_dir, "follows_", ".txt");
        let followers = discover_named(input_dir, "followers_", ".txt");
        if follows.is_empty() && followers.is_empty() {
            tracing::warn!(dir = %input_dir.display(), "no follows_*.txt or followers_*.txt lists found");
        }

        let mut stats = FollowJoinStats {
            follows_files: follows.len() as u64,
            followers_files: followers.len() as u64,
            ..Default::default()
        };
        let jobs: Vec<(ListKind, PathBuf)> = follows
            .into_iter()
            .map(|p| (ListKind::Follows, p))
            .chain(followers.into_iter().map(|p| (ListKind::Followers, p)))
            .collect();
        let files: Vec<PathBuf> = jobs.iter().map(|(_, p)| p.clone()).collect();
        let pb = maybe_bytes_bar(self.opts.progress, &files, self.opts.progress_label.as_deref(), "Follow lists");

        let mut w = GzLineWriter::create(output, self.opts.write_buffer_bytes, self.opts.compression_level)?;
        let mut row = String::with_capacity(128);
        for (kind, path) in &jobs {
            let end = for_each_line_with_progress(
                path,
                self.opts.read_buffer_bytes,
                |delta| {
                    if let Some(pb) = &pb {
                        pb.inc(delta);
                    }
                },
                |raw| {
                    if raw.is_empty() {
                        return Ok(());
                    }
                    stats.lines += 1;
                    let Ok(line) = std::str::from_utf8(raw) else {
                        stats.bad_lines += 1;
                        return Ok(());
                    };
                    let Some((account, neighbours)) = split_adjacency(line) else {
                        stats.no_neighbours += 1;
                        return Ok(());
                    };
                    for n in neighbours {
                        let (follower, followed) = match kind {
                            ListKind::Follows => (account, n),
                            ListKind::Followers => (n, account),
                        };
                        row.clear();
                        row.push_str(follower);
                        row.push(',');
                        row.push_str(followed);
                        w.write_line(&row)?;
                        stats.edges += 1;
                    }
                    Ok(())
                },
            )
            .with_context(|| format!("joining follow list {}", path.display()))?;
            if let StreamEnd::Corrupt(e) = end {
                warn_corrupt_skip(path, &e);
                stats.corrupt_files += 1;
            }
        }
        if let Some(pb) = pb {
            pb.finish_with_message("follow lists joined");
        }
        w.finish_atomic()?;

        tracing::info!(
            files = jobs.len(),
            lines = stats.lines,
            no_neighbours = stats.no_neighbours,
            edges = stats.edges,
            path = %output.display(),
            "follow lists joined"
        );
        Ok(stats)
    }

    /// Encode a gzip CSV of `follower,followed` DIDs into `enc_follower,enc_followed`
    /// through the user registry (minting unseen accounts), sorted and de-duplicated.
    /// The user registry is saved afterwards.
    pub fn encode_follow_edges(&self, input: &Path, output: &Path) -> Result<FollowStats> {
        init_tracing_once();
        self.apply_parallelism();

        let users_path = self.opts.users_registry_path();
        let _lock = WriterLock::acquire(&users_path)?;
        let (mut users, _) = Registry::load(&users_path)?;
        let before = users.next_id();

        let mut stats = FollowStats::default();
        let mut edges: Vec<(Id, Id)> = Vec::new();
        let files = [input.to_path_buf()];
        let pb = maybe_bytes_bar(self.opts.progress, &files, self.opts.progress_label.as_deref(), "Follow edges");

        let end = for_each_line_with_progress(
            input,
            self.opts.read_buffer_bytes,
            |delta| {
                if let Some(pb) = &pb {
                    pb.inc(delta);
                }
            },
            |raw| {
                if raw.is_empty() {
                    return Ok(());
                }
                stats.lines += 1;
                match std::str::from_utf8(raw).ok().and_then(split_pair) {
                    Some((follower, followed)) => {
                        let u = users.lookup_or_insert(follower);
                        let v = users.lookup_or_insert(followed);
                        edges.push((u, v));
                    }
                    None => stats.bad_lines += 1,
                }
                Ok(())
            },
        )
        .with_context(|| format!("reading follow edges {}", input.display()))?;
        if let Some(pb) = pb {
            pb.finish_with_message("follow edges read");
        }
        if let StreamEnd::Corrupt(e) = end {
            warn_corrupt_skip(input, &e);
            stats.corrupt_input = true;
        }

        stats.edges_read = edges.len() as u64;
        edges.par_sort_unstable();
        edges.dedup();
        stats.edges_written = edges.len() as u64;
        stats.minted_users = users.next_id() - before;

        let mut w = GzLineWriter::create(output, self.opts.write_buffer_bytes, self.opts.compression_level)?;
        for (u, v) in &edges {
            w.write_line(&format!("{u},{v}"))?;
        }
        w.finish_atomic()?;
        users.save(&users_path)?;

        tracing::info!(
            lines = stats.lines,
            bad = stats.bad_lines,
            edges = stats.edges_written,
            new_users = stats.minted_users,
            path = %output.display(),
            "follow edges encoded"
        );
        Ok(stats)
    }
}
