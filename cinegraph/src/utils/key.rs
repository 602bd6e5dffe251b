//! Deterministic, storage-safe identifiers.
//!
//! Every vertex and edge key in the graph is derived here from natural
//! identity fields. Nothing in this module reads the clock, a random source
//! or any I/O, so the same inputs yield the same keys across restarts.

use super::id::{stable_digest, stable_edge_id};

pub const MAX_KEY_LEN: usize = 128;
pub const MAX_EDGE_VALUE_LEN: usize = 250;
const MAX_DOCUMENT_KEY_LEN: usize = 254;
const DIGEST_SUFFIX_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyPart<'a> {
    Text(&'a str),
    Int(i64),
    Missing,
}

impl KeyPart<'_> {
    fn render(&self) -> Option<String> {
        match self {
            KeyPart::Text(text) => {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            KeyPart::Int(value) => Some(value.to_string()),
            KeyPart::Missing => None,
        }
    }
}

impl<'a> From<&'a str> for KeyPart<'a> {
    fn from(value: &'a str) -> Self {
        KeyPart::Text(value)
    }
}

impl<'a> From<&'a String> for KeyPart<'a> {
    fn from(value: &'a String) -> Self {
        KeyPart::Text(value.as_str())
    }
}

impl From<i64> for KeyPart<'_> {
    fn from(value: i64) -> Self {
        KeyPart::Int(value)
    }
}

impl From<i32> for KeyPart<'_> {
    fn from(value: i32) -> Self {
        KeyPart::Int(i64::from(value))
    }
}

impl From<usize> for KeyPart<'_> {
    fn from(value: usize) -> Self {
        KeyPart::Int(value as i64)
    }
}

impl<'a, T: Into<KeyPart<'a>>> From<Option<T>> for KeyPart<'a> {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(KeyPart::Missing)
    }
}

/// Builds a vertex key: non-empty parts joined by `_`, lower-cased,
/// whitespace mapped to `_`, everything outside `[a-z0-9_-]` stripped and
/// the result bounded by [`MAX_KEY_LEN`].
pub fn make_key(parts: &[KeyPart<'_>]) -> String {
    let joined = parts
        .iter()
        .filter_map(KeyPart::render)
        .collect::<Vec<_>>()
        .join("_");

    let mut key = String::with_capacity(joined.len());
    for ch in joined.chars() {
        let mapped = if ch.is_whitespace() {
            '_'
        } else {
            let lower = ch.to_ascii_lowercase();
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() || lower == '-' || lower == '_' {
                lower
            } else {
                continue;
            }
        };
        if mapped == '_' && (key.is_empty() || key.ends_with('_')) {
            continue;
        }
        key.push(mapped);
    }
    while key.ends_with('_') {
        key.pop();
    }

    bound_length(key, MAX_KEY_LEN)
}

// Over-long keys keep a prefix and end in a digest of the full key, so two
// keys that only differ after the cut stay distinct.
fn bound_length(key: String, limit: usize) -> String {
    if key.len() <= limit {
        return key;
    }
    let digest = stable_digest(&key);
    let mut prefix = key[..limit - DIGEST_SUFFIX_LEN].to_string();
    while prefix.ends_with('_') {
        prefix.pop();
    }
    format!("{}_{}", prefix, digest)
}

/// Sanitizes an edge endpoint (`collection/key`). Case is preserved, only the
/// first `/` survives and the value is cut at [`MAX_EDGE_VALUE_LEN`].
pub fn sanitize_for_edge(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut seen_slash = false;
    for ch in value.chars() {
        if ch == '/' {
            if !seen_slash {
                seen_slash = true;
                out.push(ch);
            }
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
        }
        if out.len() >= MAX_EDGE_VALUE_LEN {
            break;
        }
    }
    out
}

/// Strips characters a document key may not contain at all.
pub fn sanitize_document_key(key: &str) -> String {
    key.chars()
        .filter(|ch| is_document_key_char(*ch))
        .take(MAX_DOCUMENT_KEY_LEN)
        .collect()
}

pub fn edge_key(edge: &str, from_id: &str, to_id: &str, discriminator: &[KeyPart<'_>]) -> String {
    let discriminator = discriminator
        .iter()
        .filter_map(KeyPart::render)
        .collect::<Vec<_>>()
        .join("|");
    stable_edge_id(edge, from_id, to_id, &discriminator)
        .hyphenated()
        .to_string()
}

pub fn document_id(collection: &str, key: &str) -> String {
    format!("{}/{}", collection, key)
}

fn is_document_key_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || "_-.@()+,=;$!*'%:".contains(ch)
}

pub fn is_legal_document_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_DOCUMENT_KEY_LEN && key.chars().all(is_document_key_char)
}

fn is_legal_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

/// `_from` / `_to` must be exactly `<collection>/<key>`.
pub fn is_legal_edge_ref(value: &str) -> bool {
    match value.split_once('/') {
        Some((collection, key)) => is_legal_collection_name(collection) && is_legal_document_key(key),
        None => false,
    }
}
