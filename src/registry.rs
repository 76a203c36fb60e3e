//! Identifier Registry: an append-only, bidirectional `key <-> Id` table.
//!
//! One registry per namespace (users, post URIs). Ids are dense from 0 in order of first
//! observation and are never reassigned. The on-disk form is one `"<id> <key>"` pair per
//! line, written in Id order and always rewritten in full.
//!
//! Registries are single-writer: there is no merge. A stage that mints Ids holds a
//! [`WriterLock`] on each registry file for the duration of its run.

use crate::util::{create_new_with_backoff, create_with_backoff, ensure_parent_dir, open_with_backoff, remove_with_backoff, replace_file_atomic_backoff, sibling_with_suffix};
use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Dense integer identifier handed out by a [`Registry`].
pub type Id = u64;

#[derive(Debug, Default, Clone)]
pub struct Registry {
    ids: AHashMap<Arc<str>, Id>,
    keys: BTreeMap<Id, Arc<str>>,
    next_id: Id,
}

/// What happened while loading a registry file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: u64,
    /// Wrong field count, non-integer or out-of-range id, or invalid UTF-8.
    pub malformed: u64,
    /// Id or key already present earlier in the file; the first occurrence wins.
    pub conflicting: u64,
}

impl Registry {
    /// Largest Id a registry file may hold (`i64::MAX`); larger Ids load as malformed.
    pub const MAX_ID: Id = i64::MAX as Id;

    pub fn new() -> Self {
        Self::default()
    }

    /// Existing Id for `key`, or the next Id, recorded and returned. Never fails;
    /// the empty string is a key like any other.
    pub fn lookup_or_insert(&mut self, key: &str) -> Id {
        if let Some(&id) = self.ids.get(key) {
            return id;
        }
        let id = self.next_id;
        let k: Arc<str> = Arc::from(key);
        self.ids.insert(k.clone(), id);
        self.keys.insert(id, k);
        self.next_id = id.saturating_add(1);
        id
    }

    /// Read-only lookup; never mints.
    #[inline]
    pub fn get(&self, key: &str) -> Option<Id> {
        self.ids.get(key).copied()
    }

    pub fn key_of(&self, id: Id) -> Option<&str> {
        self.keys.get(&id).map(|k| k.as_ref())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The Id the next new key will receive (max loaded Id + 1 after a load).
    pub fn next_id(&self) -> Id {
        self.next_id
    }

    /// `(id, key)` pairs in ascending Id order.
    pub fn iter(&self) -> impl Iterator<Item = (Id, &str)> + '_ {
        self.keys.iter().map(|(id, k)| (*id, k.as_ref()))
    }

    /// Load a registry file. A missing file is an empty registry (fresh corpus).
    /// Bad lines are skipped and counted, never fatal.
    pub fn load(path: &Path) -> Result<(Self, LoadReport)> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "registry file not found; starting an empty registry");
            return Ok((Self::new(), LoadReport::default()));
        }
        let f = open_with_backoff(path, 16, 50).with_context(|| format!("open registry {}", path.display()))?;
        let (reg, report) = Self::from_reader(BufReader::new(f)).with_context(|| format!("read registry {}", path.display()))?;
        if report.malformed > 0 || report.conflicting > 0 {
            tracing::warn!(
                path = %path.display(),
                malformed = report.malformed,
                conflicting = report.conflicting,
                "skipped bad registry lines"
            );
        }
        tracing::info!(path = %path.display(), entries = report.loaded, next_id = reg.next_id, "registry loaded");
        Ok((reg, report))
    }

    /// Parse `"<id> <key>"` lines from any reader.
    pub fn from_reader<R: BufRead>(mut r: R) -> io::Result<(Self, LoadReport)> {
        let mut reg = Self::new();
        let mut report = LoadReport::default();
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            if r.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let Ok(line) = std::str::from_utf8(&buf) else {
                report.malformed += 1;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split_ascii_whitespace();
            let (Some(id), Some(key), None) = (fields.next(), fields.next(), fields.next()) else {
                report.malformed += 1;
                continue;
            };
            let Some(id) = id.parse::<Id>().ok().filter(|&id| id <= Self::MAX_ID) else {
                report.malformed += 1;
                continue;
            };
            if reg.keys.contains_key(&id) || reg.ids.contains_key(key) {
                report.conflicting += 1;
                continue;
            }
            let k: Arc<str> = Arc::from(key);
            reg.ids.insert(k.clone(), id);
            reg.keys.insert(id, k);
            reg.next_id = reg.next_id.max(id + 1);
            report.loaded += 1;
        }
        Ok((reg, report))
    }

    /// Write the whole table, Id ascending. The file is replaced only on success.
    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent_dir(path)?;
        let tmp = sibling_with_suffix(path, "tmp");
        let f = create_with_backoff(&tmp, 16, 50).with_context(|| format!("create {}", tmp.display()))?;
        let mut w = BufWriter::with_capacity(1 << 20, f);
        self.write_to(&mut w).with_context(|| format!("write {}", tmp.display()))?;
        w.into_inner()
            .map_err(|e| e.into_error())
            .with_context(|| format!("flush {}", tmp.display()))?
            .sync_all()
            .ok();
        replace_file_atomic_backoff(&tmp, path)?;
        tracing::info!(path = %path.display(), entries = self.len(), "registry saved");
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for (id, key) in self.iter() {
            writeln!(w, "{id} {key}")?;
        }
        w.flush()
    }
}

/// Exclusive `<registry>.lock` marker enforcing one writer per registry file.
/// Removed on drop; a lock left behind by a crashed run must be deleted by hand.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    pub fn acquire(registry_path: &Path) -> Result<Self> {
        ensure_parent_dir(registry_path)?;
        let path = sibling_with_suffix(registry_path, "lock");
        match create_new_with_backoff(&path, 4, 25) {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => bail!(
                "registry {} is locked by another writer ({} exists); \
                 registries are single-writer. Remove the lock only if no other run is active.",
                registry_path.display(),
                path.display()
            ),
            Err(e) => Err(e).with_context(|| format!("create lock {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = remove_with_backoff(&self.path, 4, 25);
    }
}
