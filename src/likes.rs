//! Like encoding: `liker,liked_author,liked_uri,time` dumps rewritten to
//! `enc_liker,enc_author,post_id,YYYYMMDDHHMM` through both registries.

use crate::canonical::{post_key, DropReason};
use crate::codec::{for_each_line_with_progress, warn_corrupt_skip, GzLineWriter, StreamEnd};
use crate::date::{accept_time, compact_date, Validity};
use crate::paths::discover_named;
use crate::pipeline::{save_registries, SkyETL};
use crate::progress::maybe_bytes_bar;
use crate::registry::{Id, Registry, WriterLock};
use crate::util::init_tracing_once;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use time::Date;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LikeStats {
    pub files: u64,
    /// Input files that failed to decode; their output is discarded.
    pub failed_files: u64,
    pub lines: u64,
    /// Wrong field count, empty or whitespace-bearing identifiers, unparseable time.
    pub bad_lines: u64,
    pub out_of_window: u64,
    pub likes_written: u64,
    pub minted_users: u64,
    pub minted_uris: u64,
}

impl LikeStats {
    fn merge(&mut self, o: &LikeStats) {
        self.files += o.files;
        self.failed_files += o.failed_files;
        self.lines += o.lines;
        self.bad_lines += o.bad_lines;
        self.out_of_window += o.out_of_window;
        self.likes_written += o.likes_written;
    }
}

/// One like, resolved to Ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedLike {
    pub liker: Id,
    pub author: Id,
    pub post_id: Id,
    pub date: i64,
}

/// Parse one like row and mint its Ids. The post key is the liked URI plus its author,
/// the same composite the canonical shards use, so `post_id` joins against them.
///
/// A row without four usable fields is a `Parse` drop, an unreadable time a `Schema`
/// drop. Nothing is minted for a dropped row.
pub fn encode_like(line: &str, users: &mut Registry, uris: &mut Registry, min_date: Date) -> Result<EncodedLike, DropReason> {
    let mut it = line.split(',');
    let (Some(liker), Some(author), Some(uri), Some(t), None) = (it.next(), it.next(), it.next(), it.next(), it.next())
    else {
        return Err(DropReason::Parse);
    };
    fn ident(s: &str) -> Option<&str> {
        let s = s.trim();
        (!s.is_empty() && !s.contains(|c: char| c.is_ascii_whitespace())).then_some(s)
    }
    let (Some(liker), Some(author), Some(uri)) = (ident(liker), ident(author), ident(uri)) else {
        return Err(DropReason::Parse);
    };
    let date = match accept_time(t, min_date) {
        Ok(dt) => compact_date(dt),
        Err(Validity::TooEarly) => return Err(DropReason::OutOfWindow),
        Err(_) => return Err(DropReason::Schema),
    };

    let post_id = uris.lookup_or_insert(&post_key(uri, Some(author)));
    let liker = users.lookup_or_insert(liker);
    let author = users.lookup_or_insert(author);
    Ok(EncodedLike { liker, author, post_id, date })
}

impl SkyETL {
    /// Encode every `*.csv.gz` like dump in `input_dir` into a file of the same name in
    /// `output_dir`. Users and posts not seen before are minted; both registries are
    /// locked for the run and saved at the end, also when the run stops on an error.
    pub fn encode_likes(&self, input_dir: &Path, output_dir: &Path) -> Result<LikeStats> {
        init_tracing_once();

        let users_path = self.opts.users_registry_path();
        let uris_path = self.opts.uris_registry_path();
        let _users_lock = WriterLock::acquire(&users_path)?;
        let _uris_lock = WriterLock::acquire(&uris_path)?;
        let (mut users, _) = Registry::load(&users_path)?;
        let (mut uris, _) = Registry::load(&uris_path)?;
        let (users_before, uris_before) = (users.next_id(), uris.next_id());

        let files = discover_named(input_dir, "", ".csv.gz");
        if files.is_empty() {
            tracing::warn!(dir = %input_dir.display(), "no like dumps found");
        }
        fs::create_dir_all(output_dir).with_context(|| format!("create dir {}", output_dir.display()))?;
        let pb = maybe_bytes_bar(self.opts.progress, &files, self.opts.progress_label.as_deref(), "Likes");

        let mut total = LikeStats::default();
        let run = (|| -> Result<()> {
            for input in &files {
                let Some(name) = input.file_name() else { continue };
                let stats = self.encode_like_file(input, &output_dir.join(name), &mut users, &mut uris, pb.as_ref())?;
                total.merge(&stats);
            }
            Ok(())
        })();
        if let Some(pb) = pb {
            pb.finish_with_message("likes encoded");
        }

        let saved = save_registries(&users, &users_path, &uris, &uris_path);
        if let Err(e) = run {
            if let Err(save_err) = saved {
                tracing::error!(error = %format!("{save_err:#}"), "could not save registries after a failed run");
            }
            return Err(e);
        }
        saved?;

        total.minted_users = users.next_id() - users_before;
        total.minted_uris = uris.next_id() - uris_before;
        tracing::info!(
            files = total.files,
            failed = total.failed_files,
            lines = total.lines,
            bad = total.bad_lines,
            out_of_window = total.out_of_window,
            likes = total.likes_written,
            new_users = total.minted_users,
            new_posts = total.minted_uris,
            "likes encoded"
        );
        Ok(total)
    }

    fn encode_like_file(
        &self,
        input: &Path,
        output: &Path,
        users: &mut Registry,
        uris: &mut Registry,
        pb: Option<&ProgressBar>,
    ) -> Result<LikeStats> {
        let mut w = GzLineWriter::create(output, self.opts.write_buffer_bytes, self.opts.compression_level)?;
        let mut stats = LikeStats { files: 1, ..Default::default() };
        let mut row = String::with_capacity(64);

        let end = for_each_line_with_progress(
            input,
            self.opts.read_buffer_bytes,
            |delta| {
                if let Some(pb) = pb {
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
                match encode_like(line, users, uris, self.opts.min_date) {
                    Ok(like) => {
                        row.clear();
                        let _ = write!(row, "{},{},{},{}", like.liker, like.author, like.post_id, like.date);
                        w.write_line(&row)?;
                        stats.likes_written += 1;
                    }
                    Err(DropReason::OutOfWindow) => stats.out_of_window += 1,
                    Err(_) => stats.bad_lines += 1,
                }
                Ok(())
            },
        )
        .with_context(|| format!("encoding likes {}", input.display()))?;

        match end {
            StreamEnd::Complete => {
                w.finish_atomic()?;
                tracing::debug!(input = %input.display(), likes = stats.likes_written, "like file encoded");
            }
            StreamEnd::Corrupt(e) => {
                drop(w);
                warn_corrupt_skip(input, &e);
                stats.failed_files = 1;
                stats.likes_written = 0;
            }
        }
        Ok(stats)
    }
}
