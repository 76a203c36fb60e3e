//! Language lookup table (`raw code -> normalized tag`) and the one-off generator that
//! builds it from a full scan of the raw corpus.

use crate::codec::{for_each_line, warn_corrupt_skip, StreamEnd};
use crate::envelope::Envelope;
use crate::paths::discover_chunk_files;
use crate::pipeline::SkyETL;
use crate::progress::make_count_progress;
use crate::util::{create_with_backoff, ensure_parent_dir, init_tracing_once, replace_file_atomic_backoff, sibling_with_suffix};
use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// A normalized language tag: the generator assigns integers, hand-edited tables may
/// map to strings, and unmapped codes pass through as strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LangTag {
    Id(u64),
    Code(String),
}

#[derive(Clone, Debug, Default)]
pub struct LanguageMap {
    // lowercased code -> mapped tag (None when the table says null)
    table: AHashMap<String, Option<LangTag>>,
}

impl LanguageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a flat JSON object. Missing, empty or unreadable files give an empty table:
    /// every code then passes through unchanged.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "language map not readable; languages will not be mapped");
                return Self::new();
            }
        };
        if content.trim().is_empty() {
            tracing::warn!(path = %path.display(), "language map is empty; languages will not be mapped");
            return Self::new();
        }
        match Self::from_json_str(&content) {
            Ok(m) => {
                tracing::info!(path = %path.display(), entries = m.len(), "language map loaded");
                m
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "language map is not a JSON object; languages will not be mapped");
                Self::new()
            }
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let obj: serde_json::Map<String, Value> = serde_json::from_str(s).context("parse language map")?;
        let mut m = Self::new();
        for (code, v) in obj {
            let tag = match v {
                Value::String(s) => Some(LangTag::Code(s)),
                Value::Number(n) => n.as_u64().map(LangTag::Id),
                _ => None,
            };
            m.insert(&code, tag);
        }
        Ok(m)
    }

    pub fn insert(&mut self, code: &str, tag: Option<LangTag>) {
        self.table.insert(code.to_lowercase(), tag);
    }

    /// Case-insensitive lookup. Unknown codes, and codes the table maps to null,
    /// come back as the raw code.
    pub fn normalize(&self, code: &str) -> LangTag {
        match self.table.get(&code.to_lowercase()) {
            Some(Some(tag)) => tag.clone(),
            _ => LangTag::Code(code.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageMapReport {
    pub files: usize,
    pub codes: usize,
    pub path: PathBuf,
}

fn langs_in_file(path: &Path, read_buf: usize) -> Result<AHashSet<String>> {
    let mut found = AHashSet::new();
    let end = for_each_line(path, read_buf, |line| {
        let Ok(v) = serde_json::from_slice::<Value>(line) else { return Ok(()) };
        if let Some(env) = Envelope::parse(&v) {
            for code in env.langs() {
                found.insert(code.to_lowercase());
            }
        }
        Ok(())
    })?;
    if let StreamEnd::Corrupt(e) = end {
        warn_corrupt_skip(path, &e);
    }
    Ok(found)
}

impl SkyETL {
    /// Scan every raw chunk (read-only, in parallel), collect all language codes
    /// (lowercased), and write them sorted with integer tags starting at 1.
    pub fn build_language_map(&self) -> Result<LanguageMapReport> {
        init_tracing_once();
        self.apply_parallelism();

        let jobs = discover_chunk_files(&self.opts.base_dir);
        let read_buf = self.opts.read_buffer_bytes;
        let pb = self.opts.progress.then(|| make_count_progress(jobs.len() as u64, "Scanning languages"));

        let sets: Vec<AHashSet<String>> = jobs
            .par_iter()
            .map(|job| {
                let found = langs_in_file(&job.path, read_buf).unwrap_or_else(|e| {
                    tracing::warn!(path = %job.path.display(), error = %format!("{e:#}"), "skipping unreadable chunk");
                    AHashSet::new()
                });
                if let Some(pb) = &pb {
                    pb.inc(1);
                }
                found
            })
            .collect();
        if let Some(pb) = pb {
            pb.finish_with_message("languages scanned");
        }

        let codes: BTreeSet<String> = sets.into_iter().flatten().collect();
        let mut obj = serde_json::Map::new();
        for (i, code) in codes.iter().enumerate() {
            obj.insert(code.clone(), Value::from(i as u64 + 1));
        }

        let path = self.opts.lang_map_path();
        ensure_parent_dir(&path)?;
        let tmp = sibling_with_suffix(&path, "tmp");
        let mut w = BufWriter::new(create_with_backoff(&tmp, 16, 50).with_context(|| format!("create {}", tmp.display()))?);
        serde_json::to_writer_pretty(&mut w, &Value::Object(obj))?;
        w.write_all(b"\n")?;
        w.flush()?;
        drop(w);
        replace_file_atomic_backoff(&tmp, &path)?;

        tracing::info!(files = jobs.len(), codes = codes.len(), path = %path.display(), "language map written");
        Ok(LanguageMapReport { files: jobs.len(), codes: codes.len(), path })
    }
}
