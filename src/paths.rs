use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// One raw input file and the canonical shard it produces.
#[derive(Clone, Debug)]
pub struct ChunkJob {
    /// Position in the global discovery order; names the output shard (`<index>.jsonl.gz`).
    pub index: usize,
    pub chunk: String,
    pub path: PathBuf,
}

impl ChunkJob {
    pub fn shard_name(&self) -> String {
        format!("{}.jsonl.gz", self.index)
    }
}

fn trailing_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)(?:\D*)$").expect("static regex"))
}

fn leading_number(name: &str) -> Option<u64> {
    name.split('.').next().and_then(|s| s.parse().ok())
}

/// Numeric-aware ordering: `chunk_2` before `chunk_10`, then plain name order.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let num = |s: &str| trailing_number_re().captures(s).and_then(|c| c[1].parse::<u64>().ok());
    match (num(a), num(b)) {
        (Some(x), Some(y)) if x != y => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn sorted_entries(dir: &Path) -> Vec<(String, PathBuf)> {
    let mut v: Vec<(String, PathBuf)> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(|n| (n.to_string(), e.path().to_path_buf())))
        .collect();
    v.sort_by(|a, b| natural_cmp(&a.0, &b.0));
    v
}

/// Discover raw inputs: every `*.gz` inside every directory whose name contains `chunk`,
/// plus loose `*.gz` files directly under `base`. Order is stable across runs, which keeps
/// first-observation order (and therefore Id assignment) deterministic.
pub fn discover_chunk_files(base: &Path) -> Vec<ChunkJob> {
    let mut jobs = Vec::new();
    if !base.exists() {
        tracing::warn!(path = %base.display(), "raw corpus directory does not exist");
        return jobs;
    }
    for (name, path) in sorted_entries(base) {
        if path.is_dir() && name.contains("chunk") {
            for (fname, fpath) in sorted_entries(&path) {
                if fpath.is_file() && fname.ends_with(".gz") {
                    jobs.push(ChunkJob { index: jobs.len(), chunk: name.clone(), path: fpath });
                }
            }
        } else if path.is_file() && name.ends_with(".gz") {
            jobs.push(ChunkJob { index: jobs.len(), chunk: String::new(), path });
        }
    }
    jobs
}

/// Canonical shards in `dir` (`<n>.jsonl.gz`), sorted numerically by `n`;
/// names that do not start with a number sort after, by name.
pub fn discover_shards(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut v: Vec<(String, PathBuf)> = sorted_entries(dir)
        .into_iter()
        .filter(|(n, p)| p.is_file() && (n.ends_with(".gz") || n.ends_with(".zst")) && !n.ends_with(".part"))
        .collect();
    v.sort_by(|a, b| match (leading_number(&a.0), leading_number(&b.0)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.0.cmp(&b.0),
    });
    v.into_iter().map(|(_, p)| p).collect()
}

/// Regular files directly in `dir` whose name starts with `prefix` and ends with `suffix`,
/// in numeric-aware name order. A missing directory has no files.
pub fn discover_named(dir: &Path, prefix: &str, suffix: &str) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    sorted_entries(dir)
        .into_iter()
        .filter(|(n, p)| p.is_file() && n.starts_with(prefix) && n.ends_with(suffix))
        .map(|(_, p)| p)
        .collect()
}
