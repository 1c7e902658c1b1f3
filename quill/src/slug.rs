//! Slug derivation for content documents.

use uuid::Uuid;

use crate::mf2::{Document, Value};
use crate::storage::ContentStore;

/// Property under which the resolved slug is persisted.
pub const PROPERTY: &str = "slug";

/// Name-derived slugs shorter than this are lengthened with content words.
const MIN_WORDS: usize = 3;
/// Number of content words used when deriving from content.
const CONTENT_WORDS: usize = 5;

/// Reduce text to a URL-safe slug: lowercased, with every run of
/// non-alphanumeric characters collapsed into a single hyphen and no
/// leading or trailing hyphen.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut gap = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if gap && !slug.is_empty() {
                slug.push('-');
            }
            gap = false;
            slug.extend(c.to_lowercase());
        } else {
            gap = true;
        }
    }
    slug
}

/// Derive a slug candidate from the document's `name`, falling back to its
/// `content`. A short name is lengthened with content words so slugs stay
/// distinctive. Returns `None` when the document offers no usable text.
pub fn derive(doc: &Document) -> Option<String> {
    let name = doc
        .first_string("name")
        .map(slugify)
        .filter(|slug| !slug.is_empty());
    let content = content_text(doc)
        .map(|text| slugify(&text))
        .filter(|slug| !slug.is_empty());

    match (name, content) {
        (Some(name), Some(content)) if word_count(&name) < MIN_WORDS => {
            Some(format!("{name}-{content}"))
        }
        (Some(name), _) => Some(name),
        (None, Some(content)) => Some(content),
        (None, None) => None,
    }
}

/// Resolve a candidate against the store. A taken slug, or a store that
/// cannot be asked, yields the candidate with a random suffix appended
/// rather than a failed request.
pub fn ensure_unique(store: &dyn ContentStore, candidate: &str) -> String {
    match store.exists_by_slug(candidate) {
        Ok(false) => candidate.to_owned(),
        Ok(true) => format!("{candidate}{}", Uuid::new_v4()),
        Err(e) => {
            log::warn!(target: "storage", "Slug uniqueness check failed, treating {candidate:?} as taken: {e}");
            format!("{candidate}{}", Uuid::new_v4())
        }
    }
}

fn word_count(slug: &str) -> usize {
    slug.split('-').filter(|word| !word.is_empty()).count()
}

/// First usable text of the `content` property. Plain strings are used
/// directly; embedded content objects are probed for a `value` or `html`
/// entry. HTML markup is reduced to its visible text.
fn content_text(doc: &Document) -> Option<String> {
    let values = doc.properties.get("content")?;
    let text = values.iter().find_map(|value| match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Object(map) => map
            .get("value")
            .or_else(|| map.get("html"))
            .and_then(nested_string),
        _ => None,
    })?;

    let text = html_to_text(&text, CONTENT_WORDS);
    (!text.is_empty()).then_some(text)
}

fn nested_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
        serde_json::Value::Array(list) => list.iter().find_map(nested_string),
        _ => None,
    }
}

/// Strip markup from `input` and return at most `max_words` words of its
/// visible text, whitespace-collapsed and free of control characters.
///
/// A `<` only opens a tag when followed by a letter, `/` or `!`; anything
/// else is treated as literal text, so malformed or plain-text input passes
/// through unchanged. The contents of `script` and `style` elements are
/// never visible text.
fn html_to_text(input: &str, max_words: usize) -> String {
    if max_words == 0 {
        return String::new();
    }
    let mut text = String::new();
    let mut rest = input;

    while let Some(pos) = rest.find('<') {
        let (before, after) = rest.split_at(pos);
        text.push_str(before);

        let tail = &after[1..];
        if !tail.starts_with(|c: char| c.is_ascii_alphabetic() || c == '/' || c == '!') {
            text.push('<');
            rest = tail;
            continue;
        }
        let Some(end) = tail.find('>') else {
            // Unterminated tag, swallow the remainder.
            rest = "";
            break;
        };
        let tag = tail[..end].trim_start_matches('/');
        let name: String = tag
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        text.push(' ');
        rest = &tail[end + 1..];

        if name == "script" || name == "style" {
            rest = skip_element(rest, &name);
        }
    }
    text.push_str(rest);

    let cleaned: String = text.chars().filter(|&c| !is_control(c)).collect();
    cleaned
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Advance past the closing tag of the named element.
fn skip_element<'a>(rest: &'a str, name: &str) -> &'a str {
    let close = format!("</{name}");
    let Some(pos) = rest.to_ascii_lowercase().find(&close) else {
        return "";
    };
    match rest[pos..].find('>') {
        Some(end) => &rest[pos + end + 1..],
        None => "",
    }
}

fn is_control(c: char) -> bool {
    (c < ' ' && c != '\n' && c != '\r' && c != '\t') || c == '\x7f'
}
