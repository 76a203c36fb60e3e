//! Compressed line I/O: streaming readers over `.gz` / `.zst` / plain JSONL and CSV,
//! a gzip line writer that promotes its output atomically, and integrity validators.

use crate::util::{create_with_backoff, ensure_parent_dir, open_with_backoff, remove_with_backoff, replace_file_atomic_backoff, sibling_with_suffix};
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::mem::maybe_throttle_low_memory;

/// Compression of an input file, chosen by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Zstd,
    Plain,
}

impl Codec {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(e) if e.eq_ignore_ascii_case("gz") => Codec::Gzip,
            Some(e) if e.eq_ignore_ascii_case("zst") => Codec::Zstd,
            _ => Codec::Plain,
        }
    }
}

/// How a stream ended. A read/decode failure is not an `Err`: the lines seen before it
/// were already delivered, and the caller decides whether the partial file counts.
#[derive(Debug)]
pub enum StreamEnd {
    Complete,
    Corrupt(anyhow::Error),
}

/// A `Read` wrapper that counts compressed bytes read.
struct CountingReader<R: Read> {
    inner: R,
    counter: Arc<AtomicU64>,
}
impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

fn open_decoded(path: &Path, counter: Arc<AtomicU64>) -> Result<Box<dyn Read>> {
    let file = open_with_backoff(path, 16, 50).with_context(|| format!("open {}", path.display()))?;
    let cnt = CountingReader { inner: file, counter };
    Ok(match Codec::from_path(path) {
        Codec::Gzip => Box::new(MultiGzDecoder::new(cnt)),
        Codec::Zstd => {
            let mut dec = zstd::stream::read::Decoder::new(cnt)?;
            dec.window_log_max(31)?;
            Box::new(dec)
        }
        Codec::Plain => Box::new(cnt),
    })
}

/// Stream a (possibly compressed) line file; `on_line` receives raw bytes with `\r?\n`
/// stripped so that invalid UTF-8 can be counted by the caller instead of aborting.
/// `on_progress(delta)` receives compressed bytes consumed.
///
/// Errors returned by `on_line` abort the stream and are returned as `Err`.
/// Failure to open the file is also an `Err`. A failure while reading or decoding after
/// that is reported as `StreamEnd::Corrupt`; progress is advanced to the file size.
pub fn for_each_line_with_progress(
    path: &Path,
    read_buf_bytes: usize,
    mut on_progress: impl FnMut(u64),
    mut on_line: impl FnMut(&[u8]) -> Result<()>,
) -> Result<StreamEnd> {
    let counter = Arc::new(AtomicU64::new(0));
    let decoded = open_decoded(path, counter.clone())?;
    let mut reader = BufReader::with_capacity(read_buf_bytes.max(8 * 1024), decoded);

    let mut buf: Vec<u8> = Vec::with_capacity(16 * 1024);
    let mut last = 0u64;
    loop {
        buf.clear();
        let n = match reader.read_until(b'\n', &mut buf) {
            Ok(n) => n,
            Err(e) => {
                let total = fs::metadata(path).map(|m| m.len()).unwrap_or(last);
                if total > last {
                    on_progress(total - last);
                }
                let err = anyhow::Error::new(e).context(format!("decode {}", path.display()));
                return Ok(StreamEnd::Corrupt(err));
            }
        };
        if n == 0 {
            let cur = counter.load(Ordering::Relaxed);
            if cur > last {
                on_progress(cur - last);
            }
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        let cur = counter.load(Ordering::Relaxed);
        if cur > last {
            on_progress(cur - last);
            last = cur;
        }
        on_line(&buf)?;
        maybe_throttle_low_memory(0.05);
    }
    Ok(StreamEnd::Complete)
}

/// Same as [`for_each_line_with_progress`] without progress reporting.
pub fn for_each_line(path: &Path, read_buf_bytes: usize, on_line: impl FnMut(&[u8]) -> Result<()>) -> Result<StreamEnd> {
    for_each_line_with_progress(path, read_buf_bytes, |_| {}, on_line)
}

/// Log a corrupt input that is being skipped (lines read before the failure are kept).
pub fn warn_corrupt_skip(path: &Path, e: &anyhow::Error) {
    let abs = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    tracing::warn!(
        path = %abs.display(),
        error = %format!("{e:#}"),
        "Stopped reading file after a decode error; remaining lines were skipped. \
         This usually means a truncated or corrupt archive."
    );
}

// ----------------------------- Writing ----------------------------------

/// Gzip line writer. Output goes to `<final>.part` and is promoted to the final path only
/// by [`GzLineWriter::finish_atomic`]; dropping an unfinished writer removes the part file,
/// so a final path on disk always holds a complete stream.
pub struct GzLineWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    w: Option<BufWriter<GzEncoder<File>>>,
    lines: u64,
}

impl GzLineWriter {
    pub fn create(final_path: &Path, buf_bytes: usize, level: u32) -> Result<Self> {
        ensure_parent_dir(final_path)?;
        let tmp_path = sibling_with_suffix(final_path, "part");
        let f = create_with_backoff(&tmp_path, 16, 50).with_context(|| format!("create {}", tmp_path.display()))?;
        let enc = GzEncoder::new(f, Compression::new(level.min(9)));
        Ok(Self {
            final_path: final_path.to_path_buf(),
            tmp_path,
            w: Some(BufWriter::with_capacity(buf_bytes.max(8 * 1024), enc)),
            lines: 0,
        })
    }

    /// Write `s` followed by `\n`.
    #[inline]
    pub fn write_line(&mut self, s: &str) -> Result<()> {
        if let Some(w) = &mut self.w {
            w.write_all(s.as_bytes())?;
            w.write_all(b"\n")?;
            self.lines += 1;
        }
        Ok(())
    }

    /// Serialize `value` as one compact JSON line.
    pub fn write_json_line<T: Serialize>(&mut self, value: &T) -> Result<()> {
        if let Some(w) = &mut self.w {
            serde_json::to_writer(&mut *w, value)?;
            w.write_all(b"\n")?;
            self.lines += 1;
        }
        Ok(())
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    /// Flush, finish the gzip trailer and promote the temp file to the final path.
    pub fn finish_atomic(mut self) -> Result<PathBuf> {
        let res = self.promote();
        if res.is_err() {
            let _ = remove_with_backoff(&self.tmp_path, 4, 25);
        }
        res
    }

    fn promote(&mut self) -> Result<PathBuf> {
        if let Some(w) = self.w.take() {
            let enc = w
                .into_inner()
                .map_err(|e| e.into_error())
                .with_context(|| format!("flush {}", self.tmp_path.display()))?;
            let f = enc.finish().with_context(|| format!("finish gzip {}", self.tmp_path.display()))?;
            f.sync_all().ok();
        }
        replace_file_atomic_backoff(&self.tmp_path, &self.final_path)?;
        Ok(self.final_path.clone())
    }
}

impl Drop for GzLineWriter {
    fn drop(&mut self) {
        if self.w.take().is_some() {
            if let Err(e) = remove_with_backoff(&self.tmp_path, 4, 25) {
                tracing::debug!(path = %self.tmp_path.display(), error = %e, "could not remove abandoned part file");
            }
        }
    }
}

// ----------------------------- Integrity checks ----------------------------------

/// QUICK check: attempt to decode up to `max_decompressed_bytes` and stop.
pub fn quick_validate(path: &Path, max_decompressed_bytes: u64) -> Result<()> {
    let mut limited = open_decoded(path, Arc::new(AtomicU64::new(0)))?.take(max_decompressed_bytes);
    io::copy(&mut limited, &mut io::sink()).with_context(|| format!("decode {}", path.display()))?;
    Ok(())
}

/// FULL check: decode the entire stream to EOF (validates the gzip CRC trailer).
pub fn validate_full(path: &Path) -> Result<()> {
    let mut decoder = open_decoded(path, Arc::new(AtomicU64::new(0)))?;
    io::copy(&mut decoder, &mut io::sink()).with_context(|| format!("decode {}", path.display()))?;
    Ok(())
}
