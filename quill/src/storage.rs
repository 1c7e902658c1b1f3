pub mod git;
pub mod memory;

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::mf2::normalize::FilePart;
use crate::mf2::{self, Document, Value};

#[derive(Error, Debug)]
pub enum Error {
    /// No content is stored at the given URL.
    #[error("no content stored at \"{0}\"")]
    NotFound(Url),
    /// The document violates a model invariant.
    #[error(transparent)]
    Document(#[from] mf2::Error),
    /// The working copy cannot be read.
    #[error("no permission to access the working copy: {0}")]
    NoPermission(#[source] io::Error),
    /// The working copy cannot be classified.
    #[error("unable to inspect the working copy: {0}")]
    Inspect(#[source] io::Error),
    /// Local history no longer fast-forwards to the remote.
    #[error("the working copy has diverged from its remote")]
    Diverged,
    /// The store's public base URL cannot address content.
    #[error("\"{0}\" cannot be used as a content base URL")]
    InvalidBase(Url),
    /// The operation is not supported by this store.
    #[error("{0} is not supported by this store")]
    Unsupported(&'static str),
    /// A failed write could not be rolled back either. The working copy is
    /// in an undefined state until the next startup repair.
    #[error("{source}; also, failed to roll back the working copy: {reset}")]
    Rollback {
        source: Box<Error>,
        reset: Box<Error>,
    },

    #[error("git: {0}")]
    Git(#[from] git2::Error),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A stored content object. This is also the on-disk representation used
/// by file-backed stores: the document's members are flattened next to the
/// object's own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentObject {
    /// Public URL the object is addressed by.
    pub url: Url,
    #[serde(flatten)]
    pub document: Document,
    /// Whether the object has been tombstoned.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// Outcome of a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub url: Url,
    /// Whether the object was durable when the call returned. Stores that
    /// finish publishing in the background return `false`.
    pub synchronous: bool,
}

/// Outcome of a successful undelete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undeleted {
    pub url: Url,
    /// Whether the object came back under a different URL.
    pub moved: bool,
}

/// Property deletions requested by an update: either whole properties by
/// name, or specific values out of their sequences.
#[derive(Debug, Clone, PartialEq)]
pub enum Deletions {
    Properties(Vec<String>),
    Values(BTreeMap<String, Vec<Value>>),
}

/// An update to a stored document. Replacements are applied first, then
/// additions, then deletions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub replace: BTreeMap<String, Vec<Value>>,
    pub add: BTreeMap<String, Vec<Value>>,
    pub delete: Option<Deletions>,
}

impl Update {
    pub fn apply(&self, doc: &mut Document) {
        for (name, values) in &self.replace {
            doc.properties.insert(name.clone(), values.clone());
        }
        for (name, values) in &self.add {
            doc.properties
                .entry(name.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        match &self.delete {
            Some(Deletions::Properties(names)) => {
                for name in names {
                    doc.properties.remove(name);
                }
            }
            Some(Deletions::Values(map)) => {
                for (name, values) in map {
                    if let Some(sequence) = doc.properties.get_mut(name) {
                        sequence.retain(|value| !values.contains(value));
                    }
                }
            }
            None => {}
        }
        // A property with no values left is no property at all.
        doc.properties.retain(|_, values| !values.is_empty());
    }
}

/// Durable storage for content objects.
///
/// Implementations are expected to serialize their own writes; callers may
/// share one store across threads.
pub trait ContentStore: Send + Sync {
    /// Whether any stored object, tombstoned or not, carries the given slug.
    fn exists_by_slug(&self, slug: &str) -> Result<bool, Error>;
    /// Persist a new document and return its public URL.
    fn create(&self, doc: Document) -> Result<Created, Error>;
    /// Apply an update to the document stored at `url` and return the URL it
    /// lives under afterwards.
    fn update(&self, url: &Url, update: Update) -> Result<Url, Error>;
    /// Tombstone the object stored at `url`. Idempotent.
    fn delete(&self, url: &Url) -> Result<(), Error>;
    /// Restore a tombstoned object. Idempotent.
    fn undelete(&self, url: &Url) -> Result<Undeleted, Error>;
    /// Fetch the object stored at `url`, tombstoned or not.
    fn get(&self, url: &Url) -> Result<Option<ContentObject>, Error>;
}

/// Storage for uploaded media files.
pub trait MediaStore: Send + Sync {
    /// Persist an uploaded file and return its public URL.
    fn save(&self, file: FilePart) -> Result<Url, Error>;
}

/// A media store for deployments without media storage.
pub struct NoopMediaStore;

impl MediaStore for NoopMediaStore {
    fn save(&self, _file: FilePart) -> Result<Url, Error> {
        Err(Error::Unsupported("media storage"))
    }
}

/// Public URL of the object stored under `filename`.
pub(crate) fn object_url(base: &Url, filename: &str) -> Result<Url, Error> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::InvalidBase(base.clone()))?
        .pop_if_empty()
        .push(filename);

    Ok(url)
}
