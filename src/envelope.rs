//! Raw record shapes. Crawls write either the post view itself ("flat") or a
//! `{user, post: {...}}` wrapper; both are resolved once into [`Envelope`] and every
//! field accessor below works the same on either shape.

use serde_json::{Map, Value};

type Object = Map<String, Value>;

#[derive(Clone, Copy, Debug)]
pub enum Envelope<'a> {
    /// The post view at top level: `{uri, author, record, ...}`; a timeline crawl may add
    /// the observing account as `user`.
    Flat { post: &'a Object },
    /// `{user, post: {...}, reply?: {...}}`.
    Wrapped { outer: &'a Object, post: &'a Object },
}

impl<'a> Envelope<'a> {
    /// `None` when the value has neither a `record` nor a `post` object (schema error).
    pub fn parse(v: &'a Value) -> Option<Self> {
        let top = v.as_object()?;
        if let Some(rec) = top.get("record") {
            return rec.is_object().then_some(Envelope::Flat { post: top });
        }
        match top.get("post") {
            Some(Value::Object(post)) => Some(Envelope::Wrapped { outer: top, post }),
            _ => None,
        }
    }

    /// Object holding envelope-level fields (`user`, top-level `reply`).
    fn top(&self) -> &'a Object {
        match *self {
            Envelope::Flat { post } => post,
            Envelope::Wrapped { outer, .. } => outer,
        }
    }

    pub fn post(&self) -> &'a Object {
        match *self {
            Envelope::Flat { post } | Envelope::Wrapped { post, .. } => post,
        }
    }

    pub fn record(&self) -> Option<&'a Object> {
        self.post().get("record").and_then(Value::as_object)
    }

    pub fn uri(&self) -> Option<&'a str> {
        non_empty_str(self.post().get("uri"))
    }

    /// The account whose crawl produced this record, if the crawler recorded it.
    pub fn observer(&self) -> Option<&'a str> {
        non_empty_str(self.top().get("user"))
    }

    /// `post.author.did`.
    pub fn author_did(&self) -> Option<&'a str> {
        nested_did(self.post())
    }

    /// `record.createdAt`, else `record.created_at`. Returned raw; the type is checked later.
    pub fn created_at(&self) -> Option<&'a Value> {
        let rec = self.record()?;
        rec.get("createdAt").or_else(|| rec.get("created_at")).filter(|v| !v.is_null())
    }

    pub fn text(&self) -> Option<&'a str> {
        self.record()?.get("text")?.as_str().filter(|s| !s.is_empty())
    }

    /// Raw language codes; a bare string counts as a one-element list.
    pub fn langs(&self) -> Vec<&'a str> {
        match self.record().and_then(|r| r.get("langs")) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.as_str()],
            _ => Vec::new(),
        }
    }

    /// Engagement counter under its snake_case or camelCase name.
    /// Absent is `Some(0)`; present but null or not an integer is `None`.
    pub fn counter(&self, snake: &str, camel: &str) -> Option<i64> {
        match self.post().get(snake).or_else(|| self.post().get(camel)) {
            None => Some(0),
            Some(v) => v.as_i64(),
        }
    }

    /// Reply reference: envelope-level `reply`, else `record.reply`. Non-objects are ignored.
    pub fn reply_ref(&self) -> Option<&'a Object> {
        self.top()
            .get("reply")
            .and_then(Value::as_object)
            .or_else(|| self.record()?.get("reply").and_then(Value::as_object))
    }

    /// Quoted record from `post.embed.record`, unwrapping record-with-media embeds.
    pub fn quote_ref(&self) -> Option<&'a Object> {
        let embed = self.post().get("embed")?.as_object()?;
        let mut quoted = embed.get("record")?.as_object()?;
        if let Some(inner) = quoted.get("record").and_then(Value::as_object) {
            quoted = inner;
        }
        Some(quoted)
    }

    /// Content labels: label objects contribute their `val`, plain strings pass through.
    pub fn labels(&self) -> Option<Vec<String>> {
        let items = self.post().get("labels")?.as_array()?;
        Some(
            items
                .iter()
                .filter_map(|l| match l {
                    Value::Object(o) => o.get("val").and_then(Value::as_str),
                    Value::String(s) => Some(s.as_str()),
                    _ => None,
                })
                .map(str::to_string)
                .collect(),
        )
    }
}

/// A reference to another record (`reply.parent`, `reply.root`, the quoted record).
#[derive(Clone, Copy, Debug)]
pub struct RecordRef<'a> {
    pub uri: &'a str,
    /// `author.did` when embedded, else the DID in the URI authority.
    pub author_did: Option<&'a str>,
}

impl<'a> RecordRef<'a> {
    pub fn from_object(obj: &'a Object) -> Option<Self> {
        let uri = non_empty_str(obj.get("uri"))?;
        let author_did = nested_did(obj).or_else(|| did_from_at_uri(uri));
        Some(Self { uri, author_did })
    }

    /// `parent` / `root` member of a reply reference.
    pub fn member(reply: &'a Object, name: &str) -> Option<Self> {
        Self::from_object(reply.get(name)?.as_object()?)
    }
}

/// DID in the authority of an AT-URI: `at://did:plc:abc/app.bsky.feed.post/xyz` -> `did:plc:abc`.
pub fn did_from_at_uri(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("at://")?;
    let authority = rest.split('/').next()?;
    (authority.starts_with("did:") && authority.len() > 4).then_some(authority)
}

fn nested_did(obj: &Object) -> Option<&str> {
    non_empty_str(obj.get("author")?.as_object()?.get("did"))
}

/// Identifier-like string (URI, DID, handle): trimmed, non-empty, no inner whitespace,
/// since registry files are whitespace-separated.
fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.contains(|c: char| c.is_ascii_whitespace()))
}
