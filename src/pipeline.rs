use crate::canonical::{CanonicalStats, Canonicalizer};
use crate::codec::{for_each_line_with_progress, warn_corrupt_skip, GzLineWriter, StreamEnd};
use crate::config::{DatingStrategy, ETLOptions};
use crate::langmap::LanguageMap;
use crate::paths::{discover_chunk_files, ChunkJob};
use crate::progress::maybe_bytes_bar;
use crate::registry::{Registry, WriterLock};
use crate::util::{create_with_backoff, ensure_parent_dir, init_tracing_once};
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::Date;

/// Pipeline entry point: options plus one method per stage.
#[derive(Clone, Default)]
pub struct SkyETL {
    pub(crate) opts: ETLOptions,
}

impl SkyETL {
    pub fn new() -> Self {
        Self { opts: ETLOptions::default() }
    }

    pub fn with_options(opts: ETLOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ETLOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn base_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_base_dir(dir); self }
    pub fn out_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_out_dir(dir); self }
    pub fn results_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_results_dir(dir); self }
    pub fn users_registry(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_users_registry(path); self }
    pub fn uris_registry(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_uris_registry(path); self }
    pub fn lang_map(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_lang_map(path); self }
    pub fn min_date(mut self, d: Date) -> Self { self.opts = self.opts.with_min_date(d); self }
    pub fn resume(mut self, yes: bool) -> Self { self.opts = self.opts.with_resume(yes); self }
    pub fn checkpoint_registries(mut self, yes: bool) -> Self { self.opts = self.opts.with_checkpoint_registries(yes); self }
    pub fn dating(mut self, dating: DatingStrategy) -> Self { self.opts = self.opts.with_dating(dating); self }
    pub fn parallelism(mut self, threads: usize) -> Self { self.opts = self.opts.with_parallelism(threads); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn progress_label(mut self, label: impl Into<String>) -> Self { self.opts = self.opts.with_progress_label(label); self }
    pub fn io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self { self.opts = self.opts.with_io_buffers(read_bytes, write_bytes); self }
    pub fn compression_level(mut self, level: u32) -> Self { self.opts = self.opts.with_compression_level(level); self }

    /// Size the global rayon pool once; later calls are no-ops.
    pub(crate) fn apply_parallelism(&self) {
        if let Some(n) = self.opts.parallelism {
            if n > 0 {
                rayon::ThreadPoolBuilder::new().num_threads(n).build_global().ok();
            }
        }
    }

    pub(crate) fn results_file(&self, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.opts.results_dir)
            .with_context(|| format!("create dir {}", self.opts.results_dir.display()))?;
        Ok(self.opts.results_dir.join(name))
    }

    // -------- Canonicalization --------

    /// Canonicalize every raw chunk into `<out_dir>/<index>.jsonl.gz`, minting Ids into the
    /// user and URI registries. Chunks run strictly in discovery order on this thread;
    /// Id assignment follows first observation.
    ///
    /// Both registries are locked for the whole run and saved at the end (and after every
    /// shard with `checkpoint_registries`). A chunk that fails to decode is abandoned: its
    /// partial shard is discarded and the run moves on. When the run stops on an error,
    /// the registries are still saved before the error is returned, so every shard left
    /// on disk is covered by the registry files a resumed run loads.
    pub fn canonicalize(&self) -> Result<CanonicalStats> {
        init_tracing_once();

        let users_path = self.opts.users_registry_path();
        let uris_path = self.opts.uris_registry_path();
        let _users_lock = WriterLock::acquire(&users_path)?;
        let _uris_lock = WriterLock::acquire(&uris_path)?;

        let (mut users, _) = Registry::load(&users_path)?;
        let (mut uris, _) = Registry::load(&uris_path)?;
        let langs = LanguageMap::load(&self.opts.lang_map_path());

        fs::create_dir_all(&self.opts.out_dir).with_context(|| format!("create dir {}", self.opts.out_dir.display()))?;

        let jobs = discover_chunk_files(&self.opts.base_dir);
        if jobs.is_empty() {
            tracing::warn!(base = %self.opts.base_dir.display(), "No raw chunks found. Check base_dir.");
        } else {
            tracing::info!(files = jobs.len(), out = %self.opts.out_dir.display(), "canonicalizing");
        }

        let files: Vec<PathBuf> = jobs.iter().map(|j| j.path.clone()).collect();
        let pb = maybe_bytes_bar(self.opts.progress, &files, self.opts.progress_label.as_deref(), "Canonicalizing");

        let mut total = CanonicalStats::default();
        let run = (|| -> Result<()> {
            for job in &jobs {
                let dest = self.opts.out_dir.join(job.shard_name());
                if self.opts.resume && dest.exists() {
                    tracing::debug!(shard = %dest.display(), "shard exists; skipping chunk");
                    if let Some(pb) = &pb {
                        pb.inc(fs::metadata(&job.path).map(|m| m.len()).unwrap_or(0));
                    }
                    total.shards_skipped += 1;
                    continue;
                }

                let stats = self.canonicalize_chunk(job, &dest, &mut users, &mut uris, &langs, pb.as_ref())?;
                total.merge(&stats);

                if self.opts.checkpoint_registries && stats.shards_written > 0 {
                    save_registries(&users, &users_path, &uris, &uris_path)?;
                }
            }
            Ok(())
        })();
        if let Some(pb) = pb {
            pb.finish_with_message(if run.is_ok() { "canonicalized" } else { "aborted" });
        }

        let saved = save_registries(&users, &users_path, &uris, &uris_path);
        if let Err(e) = run {
            if let Err(save_err) = saved {
                tracing::error!(error = %format!("{save_err:#}"), "could not save registries after a failed run");
            }
            return Err(e);
        }
        saved?;

        let stats_path = self.results_file("canonicalize_stats.json")?;
        write_json_pretty(&stats_path, &total)?;
        total.log_summary();
        Ok(total)
    }

    fn canonicalize_chunk(
        &self,
        job: &ChunkJob,
        dest: &Path,
        users: &mut Registry,
        uris: &mut Registry,
        langs: &LanguageMap,
        pb: Option<&ProgressBar>,
    ) -> Result<CanonicalStats> {
        let mut writer = GzLineWriter::create(dest, self.opts.write_buffer_bytes, self.opts.compression_level)?;
        let mut canon = Canonicalizer::new(users, uris, langs, self.opts.min_date);

        let res = for_each_line_with_progress(
            &job.path,
            self.opts.read_buffer_bytes,
            |delta| {
                if let Some(pb) = pb {
                    pb.inc(delta);
                }
            },
            |line| {
                if line.iter().all(u8::is_ascii_whitespace) {
                    return Ok(());
                }
                if let Ok(post) = canon.canonicalize_line(line) {
                    writer.write_json_line(&post)?;
                }
                Ok(())
            },
        )
        .with_context(|| format!("canonicalizing {}", job.path.display()));
        // Open and write failures cost this chunk only, same as a corrupt stream.
        let end = res.unwrap_or_else(StreamEnd::Corrupt);

        let mut stats = canon.into_stats();
        let finished = match end {
            StreamEnd::Complete => writer.finish_atomic(),
            StreamEnd::Corrupt(e) => {
                drop(writer);
                Err(e)
            }
        };
        match finished {
            Ok(shard) => {
                stats.shards_written = 1;
                tracing::debug!(
                    chunk = %job.chunk,
                    input = %job.path.display(),
                    shard = %shard.display(),
                    kept = stats.kept,
                    "shard written"
                );
            }
            Err(e) => {
                warn_corrupt_skip(&job.path, &e);
                // Ids minted for the abandoned lines stay registered: Ids are never reused.
                stats.failed_shards = 1;
                stats.kept = 0;
                stats.nulls = Default::default();
            }
        }
        Ok(stats)
    }
}

pub(crate) fn save_registries(users: &Registry, users_path: &Path, uris: &Registry, uris_path: &Path) -> Result<()> {
    users.save(users_path)?;
    uris.save(uris_path)
}

pub(crate) fn write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let f = create_with_backoff(path, 16, 50).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, value)?;
    w.write_all(b"\n")?;
    w.flush()?;
    Ok(())
}
