use crate::codec::{quick_validate, validate_full};
use crate::paths::{discover_chunk_files, discover_shards};
use crate::pipeline::SkyETL;
use crate::progress::make_count_progress;
use crate::util::init_tracing_once;
use anyhow::Result;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::path::PathBuf;

/// Mode for integrity checks.
#[derive(Clone, Copy, Debug)]
pub enum IntegrityMode {
    /// Decode only the first `sample_bytes` (decompressed) per file.
    /// Fast and catches early corruption; cannot detect late/trailing corruption.
    Quick { sample_bytes: u64 },
    /// Decode the entire stream, including the gzip CRC trailer.
    Full,
}

/// Which files to check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrityTarget {
    /// Raw `.gz` chunks under `base_dir`.
    RawChunks,
    /// Canonical shards under `out_dir`.
    CanonicalShards,
}

impl SkyETL {
    /// Validate every file of `target` in parallel. Returns `(path, error_message)` for
    /// each file that failed; an empty list means everything decoded.
    pub fn check_integrity(&self, target: IntegrityTarget, mode: IntegrityMode) -> Result<Vec<(PathBuf, String)>> {
        init_tracing_once();
        self.apply_parallelism();

        let files: Vec<PathBuf> = match target {
            IntegrityTarget::RawChunks => discover_chunk_files(&self.opts.base_dir).into_iter().map(|j| j.path).collect(),
            IntegrityTarget::CanonicalShards => discover_shards(&self.opts.out_dir),
        };

        let label = match mode {
            IntegrityMode::Quick { .. } => "Integrity (quick)",
            IntegrityMode::Full => "Integrity (full)",
        };
        let pb = self.opts.progress.then(|| make_count_progress(files.len() as u64, label));

        let errors = Mutex::new(Vec::<(PathBuf, String)>::new());
        files.par_iter().for_each(|path| {
            let res = match mode {
                IntegrityMode::Quick { sample_bytes } => quick_validate(path, sample_bytes),
                IntegrityMode::Full => validate_full(path),
            };
            if let Err(e) = res {
                tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "integrity check failed");
                errors.lock().push((path.clone(), format!("{e:#}")));
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        });

        if let Some(pb) = pb {
            pb.finish_with_message("done");
        }
        let mut errors = errors.into_inner();
        errors.sort();
        tracing::info!(files = files.len(), bad = errors.len(), ?target, "integrity check finished");
        Ok(errors)
    }
}
