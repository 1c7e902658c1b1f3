//! Normalizers from the supported request encodings into [`Document`].
//!
//! Each encoding is reduced to the same canonical form, so everything
//! downstream of this module is encoding-agnostic.

use nonempty::NonEmpty;
use thiserror::Error;

use super::{Document, Value};

/// Reserved key carrying the bearer token in flat bodies.
pub const ACCESS_TOKEN: &str = "access_token";
/// Reserved key selecting the document type in flat bodies.
pub const TYPE_KEY: &str = "h";

/// Multipart fields that may carry an uploaded file, in selection order.
pub const FILE_FIELDS: &[&str] = &["photo", "video", "audio", "file"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("only one file is allowed per request")]
    MultipleFiles,
    #[error("file part is missing a filename")]
    MissingFilename,
}

/// An uploaded file extracted from a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

/// Normalize a structured JSON payload.
///
/// A missing or malformed `type` falls back to the default. Scalar property
/// values are promoted to single-value sequences, nulls are dropped, and
/// embedded objects are kept opaque. Properties whose sequence ends up empty
/// are dropped altogether.
pub fn json(payload: serde_json::Value) -> Document {
    let mut doc = Document::entry();
    let serde_json::Value::Object(mut input) = payload else {
        return doc;
    };

    match input.remove("type") {
        Some(serde_json::Value::String(tag)) => doc.types = NonEmpty::new(tag),
        Some(serde_json::Value::Array(tags)) => {
            let tags = tags
                .into_iter()
                .filter_map(|tag| match tag {
                    serde_json::Value::String(tag) => Some(tag),
                    _ => None,
                })
                .collect();
            if let Some(types) = NonEmpty::from_vec(tags) {
                doc.types = types;
            }
        }
        _ => {}
    }

    let Some(serde_json::Value::Object(properties)) = input.remove("properties") else {
        return doc;
    };
    for (name, value) in properties {
        let values: Vec<Value> = match value {
            serde_json::Value::Array(list) => {
                list.into_iter().filter_map(Value::from_scalar).collect()
            }
            value => Value::from_scalar(value).into_iter().collect(),
        };
        if values.is_empty() {
            continue;
        }
        doc.properties.insert(name, values);
    }
    doc
}

/// Normalize a flat key/value body, eg. `application/x-www-form-urlencoded`.
///
/// The reserved `h` key selects the type, an `[]` suffix on a key is
/// stripped, and repeated keys accumulate into one sequence in order of
/// appearance. The access token, if present, is extracted and returned
/// separately so it never lands in the document.
pub fn form<I>(pairs: I) -> (Document, Option<String>)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut doc = Document::entry();
    let mut token = None;
    let mut kind = None;

    for (key, value) in pairs {
        let name = key.strip_suffix("[]").unwrap_or(&key);

        if name == ACCESS_TOKEN {
            if token.is_none() && !value.is_empty() {
                token = Some(value);
            }
            continue;
        }
        if key == TYPE_KEY {
            if kind.is_none() && !value.is_empty() {
                kind = Some(value);
            }
            continue;
        }
        doc.properties
            .entry(name.to_owned())
            .or_default()
            .push(Value::String(value));
    }
    if let Some(kind) = kind {
        doc.types = NonEmpty::new(format!("h-{kind}"));
    }

    (doc, token)
}

/// Normalize a multipart body: value parts are flattened like a form body,
/// and at most one file part is selected from the recognized file fields.
/// Files under other fields are ignored.
pub fn multipart(
    values: Vec<(String, String)>,
    files: Vec<FilePart>,
) -> Result<(Document, Option<String>, Option<FilePart>), Error> {
    let file = select_file(files, FILE_FIELDS)?;
    let (doc, token) = form(values);

    Ok((doc, token, file))
}

/// Pick the single file allowed per request out of the candidate fields.
pub fn select_file(files: Vec<FilePart>, fields: &[&str]) -> Result<Option<FilePart>, Error> {
    let mut candidates = files.into_iter().filter(|file| {
        let name = file.field.strip_suffix("[]").unwrap_or(&file.field);
        fields.contains(&name)
    });

    let Some(file) = candidates.next() else {
        return Ok(None);
    };
    if candidates.next().is_some() {
        return Err(Error::MultipleFiles);
    }
    if file.filename.is_empty() {
        return Err(Error::MissingFilename);
    }
    Ok(Some(file))
}

/// Remove the access token from a flat body ahead of normalization. The
/// first non-empty value wins, but every occurrence is removed.
pub fn pop_access_token(pairs: &mut Vec<(String, String)>) -> Option<String> {
    let mut token = None;
    pairs.retain(|(key, value)| {
        if key.strip_suffix("[]").unwrap_or(key) != ACCESS_TOKEN {
            return true;
        }
        if token.is_none() && !value.is_empty() {
            token = Some(value.clone());
        }
        false
    });
    token
}
