//! Mention rewriting: `@handle` tokens in post text become `@<user id>`.
//!
//! A mention is `@` followed by word, `.` or `-` characters, ending in a word character,
//! at least two characters long, and not preceded by a word character (so `me@host.org`
//! is left alone). The text is rewritten in one left-to-right pass: each match is
//! substituted exactly where it was found and substituted output is never re-scanned, so a
//! handle that is a prefix of another handle cannot corrupt the longer one.

use crate::registry::{Id, Registry};
use regex::Regex;
use std::sync::OnceLock;

fn mention_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@[\w.-]+\w").expect("static regex"))
}

#[inline]
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedText {
    pub text: String,
    /// Ids of every rewritten mention, in order of appearance (repeats included).
    pub mentions: Vec<Id>,
    /// Ids minted by this call, i.e. handles the user registry had never seen.
    pub minted: Vec<Id>,
}

/// Rewrite mentions in `text`, minting user Ids for handles not yet registered.
/// Text without mentions comes back unchanged.
pub fn sanitize_mentions(text: &str, users: &mut Registry) -> SanitizedText {
    let mut out = SanitizedText::default();
    let mut last = 0usize;
    for m in mention_re().find_iter(text) {
        let preceded_by_word = text[..m.start()].chars().next_back().is_some_and(is_word_char);
        if preceded_by_word {
            continue;
        }
        let handle = &m.as_str()[1..];
        let id = match users.get(handle) {
            Some(id) => id,
            None => {
                let id = users.lookup_or_insert(handle);
                out.minted.push(id);
                id
            }
        };
        out.text.push_str(&text[last..m.start()]);
        out.text.push('@');
        out.text.push_str(&id.to_string());
        out.mentions.push(id);
        last = m.end();
    }
    out.text.push_str(&text[last..]);
    out
}
