//! Record Canonicalizer: raw post JSON in, integer-keyed [`CanonicalPost`] out.
//!
//! Every record ends in exactly one of two states: emitted, or dropped with a
//! [`DropReason`]. Anything short of an unparseable line or a missing envelope degrades
//! to `null` on the affected field only.

use crate::date::{accept_time_value, compact_date};
use crate::envelope::{Envelope, RecordRef};
use crate::langmap::{LangTag, LanguageMap};
use crate::registry::{Id, Registry};
use crate::sanitize::sanitize_mentions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

/// The normalized output record; one JSON line per accepted input record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPost {
    pub post_id: Option<Id>,
    pub user_id: Option<Id>,
    pub instance: Option<String>,
    /// `YYYYMMDDHHMM`.
    pub date: Option<i64>,
    pub text: Option<String>,
    pub langs: Option<Vec<LangTag>>,
    pub like_count: i64,
    pub reply_count: i64,
    pub repost_count: i64,
    pub reply_to: Option<Id>,
    pub replied_author: Option<Id>,
    pub thread_root: Option<Id>,
    pub thread_root_author: Option<Id>,
    pub repost_from: Option<Id>,
    pub reposted_author: Option<Id>,
    pub quotes: Option<Id>,
    pub quoted_author: Option<Id>,
    pub labels: Option<Vec<String>>,
}

/// Why a raw line produced no canonical post.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Not UTF-8 or not JSON.
    Parse,
    /// Valid JSON without a `record` / `post` envelope.
    Schema,
    /// Timestamp missing, unparseable, or before the collection window.
    OutOfWindow,
}

/// Null count per canonical field over the accepted records.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct NullCounts {
    pub post_id: u64,
    pub user_id: u64,
    pub instance: u64,
    pub date: u64,
    pub text: u64,
    pub langs: u64,
    pub like_count: u64,
    pub reply_count: u64,
    pub repost_count: u64,
    pub reply_to: u64,
    pub replied_author: u64,
    pub thread_root: u64,
    pub thread_root_author: u64,
    pub repost_from: u64,
    pub reposted_author: u64,
    pub quotes: u64,
    pub quoted_author: u64,
    pub labels: u64,
}

impl NullCounts {
    fn observe(&mut self, p: &CanonicalPost) {
        fn bump<T>(slot: &mut u64, v: &Option<T>) {
            if v.is_none() {
                *slot += 1;
            }
        }
        bump(&mut self.post_id, &p.post_id);
        bump(&mut self.user_id, &p.user_id);
        bump(&mut self.instance, &p.instance);
        bump(&mut self.date, &p.date);
        bump(&mut self.text, &p.text);
        bump(&mut self.langs, &p.langs);
        bump(&mut self.reply_to, &p.reply_to);
        bump(&mut self.replied_author, &p.replied_author);
        bump(&mut self.thread_root, &p.thread_root);
        bump(&mut self.thread_root_author, &p.thread_root_author);
        bump(&mut self.repost_from, &p.repost_from);
        bump(&mut self.reposted_author, &p.reposted_author);
        bump(&mut self.quotes, &p.quotes);
        bump(&mut self.quoted_author, &p.quoted_author);
        bump(&mut self.labels, &p.labels);
    }

    fn merge(&mut self, o: &NullCounts) {
        self.post_id += o.post_id;
        self.user_id += o.user_id;
        self.instance += o.instance;
        self.date += o.date;
        self.text += o.text;
        self.langs += o.langs;
        self.like_count += o.like_count;
        self.reply_count += o.reply_count;
        self.repost_count += o.repost_count;
        self.reply_to += o.reply_to;
        self.replied_author += o.replied_author;
        self.thread_root += o.thread_root;
        self.thread_root_author += o.thread_root_author;
        self.repost_from += o.repost_from;
        self.reposted_author += o.reposted_author;
        self.quotes += o.quotes;
        self.quoted_author += o.quoted_author;
        self.labels += o.labels;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalStats {
    pub total_lines: u64,
    /// Parse failures (not UTF-8 / not JSON).
    pub bad_lines: u64,
    pub schema_errors: u64,
    /// Dropped by the timestamp check; not counted as bad lines.
    pub out_of_window: u64,
    pub kept: u64,
    pub shards_written: u64,
    pub shards_skipped: u64,
    pub failed_shards: u64,
    pub minted_users: u64,
    pub minted_uris: u64,
    pub nulls: NullCounts,
}

impl CanonicalStats {
    pub fn merge(&mut self, o: &CanonicalStats) {
        self.total_lines += o.total_lines;
        self.bad_lines += o.bad_lines;
        self.schema_errors += o.schema_errors;
        self.out_of_window += o.out_of_window;
        self.kept += o.kept;
        self.shards_written += o.shards_written;
        self.shards_skipped += o.shards_skipped;
        self.failed_shards += o.failed_shards;
        self.minted_users += o.minted_users;
        self.minted_uris += o.minted_uris;
        self.nulls.merge(&o.nulls);
    }

    pub fn log_summary(&self) {
        tracing::info!(
            total = self.total_lines,
            bad = self.bad_lines,
            schema = self.schema_errors,
            out_of_window = self.out_of_window,
            kept = self.kept,
            shards = self.shards_written,
            skipped = self.shards_skipped,
            failed = self.failed_shards,
            new_users = self.minted_users,
            new_uris = self.minted_uris,
            "canonicalization finished"
        );
        let n = &self.nulls;
        tracing::info!(
            post_id = n.post_id, user_id = n.user_id, instance = n.instance, date = n.date,
            text = n.text, langs = n.langs, like_count = n.like_count, reply_count = n.reply_count,
            repost_count = n.repost_count, reply_to = n.reply_to, replied_author = n.replied_author,
            thread_root = n.thread_root, thread_root_author = n.thread_root_author,
            repost_from = n.repost_from, reposted_author = n.reposted_author, quotes = n.quotes,
            quoted_author = n.quoted_author, labels = n.labels,
            "null counts"
        );
    }
}

/// Registry key for a post: URI plus the authoring account, so one URI seen through
/// different accounts' timelines never collides. URI alone when no author is known.
pub fn post_key(uri: &str, author: Option<&str>) -> String {
    match author {
        Some(a) => format!("{uri}{a}"),
        None => uri.to_string(),
    }
}

/// `handle.domain.tld` -> `domain.tld`; `None` when the key has no dot (plain DIDs).
pub fn instance_of(author_key: &str) -> Option<String> {
    author_key.split_once('.').map(|(_, rest)| rest.to_string())
}

/// Borrows both registries for the length of one shard and counts what it sees.
pub struct Canonicalizer<'r> {
    users: &'r mut Registry,
    uris: &'r mut Registry,
    langs: &'r LanguageMap,
    min_date: Date,
    stats: CanonicalStats,
}

impl<'r> Canonicalizer<'r> {
    pub fn new(users: &'r mut Registry, uris: &'r mut Registry, langs: &'r LanguageMap, min_date: Date) -> Self {
        Self { users, uris, langs, min_date, stats: CanonicalStats::default() }
    }

    pub fn stats(&self) -> &CanonicalStats {
        &self.stats
    }

    pub fn into_stats(self) -> CanonicalStats {
        self.stats
    }

    /// Canonicalize one raw line, updating the statistics either way.
    pub fn canonicalize_line(&mut self, line: &[u8]) -> Result<CanonicalPost, DropReason> {
        self.stats.total_lines += 1;
        let res = match serde_json::from_slice::<Value>(line) {
            Ok(v) => self.canonicalize_value(&v),
            Err(_) => Err(DropReason::Parse),
        };
        match &res {
            Ok(post) => {
                self.stats.kept += 1;
                self.stats.nulls.observe(post);
            }
            Err(DropReason::Parse) => self.stats.bad_lines += 1,
            Err(DropReason::Schema) => self.stats.schema_errors += 1,
            Err(DropReason::OutOfWindow) => self.stats.out_of_window += 1,
        }
        res
    }

    /// The per-record state machine on an already parsed value. Does not touch the
    /// line counters (see [`Canonicalizer::canonicalize_line`]).
    pub fn canonicalize_value(&mut self, v: &Value) -> Result<CanonicalPost, DropReason> {
        let env = Envelope::parse(v).ok_or(DropReason::Schema)?;
        let created = env.created_at().ok_or(DropReason::OutOfWindow)?;
        let dt = accept_time_value(created, self.min_date).map_err(|_| DropReason::OutOfWindow)?;

        let mut post = CanonicalPost { date: Some(compact_date(dt)), ..Default::default() };

        // Seen in someone else's timeline: the observer reposted the author's post.
        let author_did = env.author_did();
        let observer = env.observer();
        let reposted_from = match (observer, author_did) {
            (Some(o), Some(a)) if o != a => Some(a),
            _ => None,
        };
        let author_key = if reposted_from.is_some() { observer } else { author_did.or(observer) };

        if let Some(key) = author_key {
            post.user_id = Some(self.mint_user(key));
            post.instance = instance_of(key);
        }

        let uri = env.uri();
        if let Some(uri) = uri {
            post.post_id = Some(self.mint_uri(&post_key(uri, author_key)));
        }

        if let Some(text) = env.text() {
            let clean = sanitize_mentions(text, &mut *self.users);
            self.stats.minted_users += clean.minted.len() as u64;
            post.text = Some(clean.text);
        }

        let langs = env.langs();
        if !langs.is_empty() {
            post.langs = Some(langs.iter().map(|l| self.langs.normalize(l)).collect());
        }

        post.like_count = self.counter(&env, "like_count", "likeCount", |n| &mut n.like_count);
        post.reply_count = self.counter(&env, "reply_count", "replyCount", |n| &mut n.reply_count);
        post.repost_count = self.counter(&env, "repost_count", "repostCount", |n| &mut n.repost_count);

        if let Some(reply) = env.reply_ref() {
            if let Some(parent) = RecordRef::member(reply, "parent") {
                let (post_ref, author) = self.resolve_ref(parent);
                post.reply_to = Some(post_ref);
                post.replied_author = author;
            }
            if let Some(root) = RecordRef::member(reply, "root") {
                let (post_ref, author) = self.resolve_ref(root);
                post.thread_root = Some(post_ref);
                post.thread_root_author = author;
            }
        }

        if let Some(original) = reposted_from {
            post.reposted_author = Some(self.mint_user(original));
            post.repost_from = uri.map(|u| self.mint_uri(&post_key(u, Some(original))));
        }

        if let Some(quoted) = env.quote_ref().and_then(RecordRef::from_object) {
            let (post_ref, author) = self.resolve_ref(quoted);
            post.quotes = Some(post_ref);
            post.quoted_author = author;
        }

        post.labels = env.labels();
        Ok(post)
    }

    fn counter(&mut self, env: &Envelope<'_>, snake: &str, camel: &str, slot: impl FnOnce(&mut NullCounts) -> &mut u64) -> i64 {
        match env.counter(snake, camel) {
            Some(n) => n,
            None => {
                *slot(&mut self.stats.nulls) += 1;
                0
            }
        }
    }

    /// Post Id (and author Id, when the author is known) of a referenced record.
    fn resolve_ref(&mut self, r: RecordRef<'_>) -> (Id, Option<Id>) {
        let post_ref = self.mint_uri(&post_key(r.uri, r.author_did));
        let author = r.author_did.map(|did| self.mint_user(did));
        (post_ref, author)
    }

    fn mint_user(&mut self, key: &str) -> Id {
        let before = self.users.next_id();
        let id = self.users.lookup_or_insert(key);
        if self.users.next_id() != before {
            self.stats.minted_users += 1;
        }
        id
    }

    fn mint_uri(&mut self, key: &str) -> Id {
        let before = self.uris.next_id();
        let id = self.uris.lookup_or_insert(key);
        if self.uris.next_id() != before {
            self.stats.minted_uris += 1;
        }
        id
    }
}

/// Lean view of a canonical line for the extractors: only the graph fields are
/// deserialized, text and labels are skipped.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MinimalPost {
    pub post_id: Option<Id>,
    pub user_id: Option<Id>,
    pub date: Option<i64>,
    pub replied_author: Option<Id>,
    pub thread_root: Option<Id>,
    pub thread_root_author: Option<Id>,
    pub reposted_author: Option<Id>,
    pub quoted_author: Option<Id>,
}

impl From<&CanonicalPost> for MinimalPost {
    fn from(p: &CanonicalPost) -> Self {
        Self {
            post_id: p.post_id,
            user_id: p.user_id,
            date: p.date,
            replied_author: p.replied_author,
            thread_root: p.thread_root,
            thread_root_author: p.thread_root_author,
            reposted_author: p.reposted_author,
            quoted_author: p.quoted_author,
        }
    }
}

#[inline]
pub fn parse_minimal(line: &[u8]) -> serde_json::Result<MinimalPost> {
    serde_json::from_slice(line)
}
