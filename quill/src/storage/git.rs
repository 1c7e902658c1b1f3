//! Git-backed content storage.
//!
//! Content objects live as JSON files inside one working copy of a site
//! repository, with a single remote as the source of truth. On startup the
//! working copy is inspected and brought into a known-good state; afterwards
//! every mutating operation is staged, committed and pushed as one
//! transaction, rolled back to the pre-attempt `HEAD` if any step fails.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use url::Url;
use uuid::Uuid;

use crate::config::{Committer, GitAuth, GitConfig};
use crate::mf2::Document;
use crate::slug;

use super::{object_url, ContentObject, ContentStore, Created, Error, Undeleted, Update};

/// Name of the remote content is pulled from and pushed to.
pub const REMOTE: &str = "origin";
/// Extension of content object files.
pub const FILE_EXT: &str = "json";

/// Classification of the local working copy path. Every state maps onto a
/// [`Repair`]; conditions that cannot be repaired, such as a path we lack
/// permission to read, are surfaced as errors by [`inspect`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingCopyState {
    /// Nothing exists at the path.
    Missing,
    /// The path exists but is not a directory.
    NotADirectory,
    /// The directory is not a git repository.
    NotARepository,
    /// The repository has no `origin`, or its `origin` does not point at the
    /// configured remote.
    WrongRemote,
    /// The repository matches expectations.
    Valid,
}

impl WorkingCopyState {
    /// What must happen before the working copy can be used.
    pub fn repair(&self) -> Repair {
        match self {
            Self::Missing => Repair::Clone,
            Self::NotADirectory | Self::NotARepository | Self::WrongRemote => Repair::WipeAndClone,
            Self::Valid => Repair::Pull,
        }
    }
}

impl fmt::Display for WorkingCopyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::NotARepository => write!(f, "not a repository"),
            Self::WrongRemote => write!(f, "tracking the wrong remote"),
            Self::Valid => write!(f, "valid"),
        }
    }
}

/// Startup repair for a [`WorkingCopyState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// Clone fresh from the remote.
    Clone,
    /// Delete whatever occupies the path, then clone fresh.
    WipeAndClone,
    /// Reuse the working copy, fast-forwarding it to the remote first.
    Pull,
}

/// Classify the working copy at `path` against the remote URL it is
/// expected to track.
pub fn inspect(path: &Path, expected_remote: &str) -> Result<WorkingCopyState, Error> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WorkingCopyState::Missing),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return Err(Error::NoPermission(e));
        }
        Err(e) => return Err(Error::Inspect(e)),
    };
    if !meta.is_dir() {
        return Ok(WorkingCopyState::NotADirectory);
    }
    let Ok(repo) = git2::Repository::open(path) else {
        return Ok(WorkingCopyState::NotARepository);
    };
    let Ok(remote) = repo.find_remote(REMOTE) else {
        return Ok(WorkingCopyState::WrongRemote);
    };
    if remote.url() != Some(expected_remote) {
        return Ok(WorkingCopyState::WrongRemote);
    }
    Ok(WorkingCopyState::Valid)
}

/// Content storage backed by one git working copy.
///
/// The repository handle lives behind a mutex, making every operation a
/// critical section: writes never interleave, and reads always see a fully
/// committed working copy.
pub struct GitStore {
    config: GitConfig,
    repo: Mutex<git2::Repository>,
}

impl fmt::Debug for GitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GitStore {
    /// Open the store, repairing the working copy first if needed.
    pub fn open(config: GitConfig) -> Result<Self, Error> {
        let state = inspect(&config.local_path, &config.repository)?;
        log::info!(
            target: "storage",
            "Working copy {:?} is {state}", config.local_path
        );

        let repo = match state.repair() {
            Repair::Clone => {
                log::info!(target: "storage", "Cloning {:?}", config.repository);
                clone(&config)?
            }
            Repair::WipeAndClone => {
                log::info!(
                    target: "storage",
                    "Wiping {:?} and cloning {:?}", config.local_path, config.repository
                );
                wipe(&config.local_path)?;
                clone(&config)?
            }
            Repair::Pull => {
                let repo = git2::Repository::open(&config.local_path)?;
                pull(&repo, &config)?;
                repo
            }
        };

        Ok(Self {
            config,
            repo: Mutex::new(repo),
        })
    }

    fn lock(&self) -> MutexGuard<'_, git2::Repository> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Directory content object files live in.
    fn content_dir(&self) -> PathBuf {
        self.config.local_path.join(&self.config.path)
    }

    /// Resolve a public URL to the content file it addresses.
    fn object_path(&self, url: &Url) -> Result<PathBuf, Error> {
        let filename =
            filename(&self.config.public_url, url).ok_or_else(|| Error::NotFound(url.clone()))?;
        Ok(self.content_dir().join(filename))
    }

    /// Read the object stored at `path`, which is addressed by `url`.
    fn read_object(&self, path: &Path, url: &Url) -> Result<ContentObject, Error> {
        let contents = match fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(url.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Serialize `object` to `path`, then stage, commit and push the change.
    /// Must run under [`GitStore::with_rollback`].
    fn write_object(
        &self,
        repo: &git2::Repository,
        path: &Path,
        object: &ContentObject,
        message: &str,
    ) -> Result<(), Error> {
        fs::create_dir_all(self.content_dir())?;
        fs::write(path, to_json(object)?)?;
        stage_all(repo)?;
        commit(repo, &self.config.committer, message)?;
        push(repo, &self.config)?;
        Ok(())
    }

    /// Run `f` against the working copy as one transaction: on failure,
    /// hard-reset to the commit that was `HEAD` before the attempt began.
    /// A reset that itself fails is chained onto the original error and
    /// leaves the working copy in an undefined state until the next
    /// startup repair.
    fn with_rollback<T>(
        &self,
        repo: &git2::Repository,
        f: impl FnOnce() -> Result<T, Error>,
    ) -> Result<T, Error> {
        let head = head_commit(repo)?;
        f().map_err(|source| {
            log::warn!(
                target: "storage",
                "Write failed, resetting working copy to {head}: {source}"
            );
            match reset_hard(repo, head) {
                Ok(()) => source,
                Err(reset) => Error::Rollback {
                    source: Box::new(source),
                    reset: Box::new(reset),
                },
            }
        })
    }
}

impl ContentStore for GitStore {
    fn exists_by_slug(&self, slug: &str) -> Result<bool, Error> {
        let _repo = self.lock();
        let entries = match fs::read_dir(self.content_dir()) {
            Ok(entries) => entries,
            // A fresh clone has no content directory until the first create.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXT) {
                continue;
            }
            let object: ContentObject = serde_json::from_slice(&fs::read(&path)?)?;
            if object.document.first_string(slug::PROPERTY) == Some(slug) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn create(&self, doc: Document) -> Result<Created, Error> {
        doc.validate()?;

        let filename = format!("{}.{FILE_EXT}", Uuid::new_v4());
        let url = object_url(&self.config.public_url, &filename)?;
        let object = ContentObject {
            url: url.clone(),
            document: doc,
            deleted: false,
        };

        let repo = self.lock();
        self.with_rollback(&repo, || {
            self.write_object(
                &repo,
                &self.content_dir().join(&filename),
                &object,
                "quill(create): new content entry",
            )
        })?;
        log::info!(target: "storage", "Created content entry {url}");

        // The push is confirmed by the time we get here, so the object is
        // already durable and addressable.
        Ok(Created {
            url,
            synchronous: true,
        })
    }

    fn update(&self, url: &Url, update: Update) -> Result<Url, Error> {
        let repo = self.lock();
        let path = self.object_path(url)?;
        let mut object = self.read_object(&path, url)?;

        update.apply(&mut object.document);
        object.document.validate()?;

        self.with_rollback(&repo, || {
            self.write_object(&repo, &path, &object, "quill(update): amend content entry")
        })?;
        log::info!(target: "storage", "Updated content entry {url}");

        // Objects are addressed by a random id, never by anything an update
        // could change, so the URL stays put.
        Ok(url.clone())
    }

    fn delete(&self, url: &Url) -> Result<(), Error> {
        let repo = self.lock();
        let path = self.object_path(url)?;
        let mut object = self.read_object(&path, url)?;
        if object.deleted {
            return Ok(());
        }
        object.deleted = true;

        self.with_rollback(&repo, || {
            self.write_object(
                &repo,
                &path,
                &object,
                "quill(delete): tombstone content entry",
            )
        })?;
        log::info!(target: "storage", "Deleted content entry {url}");

        Ok(())
    }

    fn undelete(&self, url: &Url) -> Result<Undeleted, Error> {
        let repo = self.lock();
        let path = self.object_path(url)?;
        let mut object = self.read_object(&path, url)?;
        let undeleted = Undeleted {
            url: url.clone(),
            moved: false,
        };
        if !object.deleted {
            return Ok(undeleted);
        }
        object.deleted = false;

        self.with_rollback(&repo, || {
            self.write_object(
                &repo,
                &path,
                &object,
                "quill(undelete): restore content entry",
            )
        })?;
        log::info!(target: "storage", "Restored content entry {url}");

        Ok(undeleted)
    }

    fn get(&self, url: &Url) -> Result<Option<ContentObject>, Error> {
        let _repo = self.lock();
        let Some(filename) = filename(&self.config.public_url, url) else {
            return Ok(None);
        };
        let contents = match fs::read(self.content_dir().join(filename)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&contents)?))
    }
}

/// Filename addressed by `url`, provided it points at a direct child of the
/// public base. Anything else, including traversal attempts and nested
/// paths, resolves to nothing.
fn filename(base: &Url, url: &Url) -> Option<String> {
    let rest = url.as_str().strip_prefix(base.as_str().trim_end_matches('/'))?;
    let name = rest.strip_prefix('/')?;
    if name.is_empty()
        || name.contains(['/', '\\', '?', '#'])
        || !name.ends_with(&format!(".{FILE_EXT}"))
    {
        return None;
    }
    Some(name.to_owned())
}

/// Content files are version-controlled; pretty-printing keeps their diffs
/// reviewable.
fn to_json(object: &ContentObject) -> Result<Vec<u8>, Error> {
    let mut contents = serde_json::to_vec_pretty(object)?;
    contents.push(b'\n');

    Ok(contents)
}

/// `remove_dir_all` refuses plain files, which is exactly what the
/// not-a-directory state leaves behind.
fn wipe(path: &Path) -> Result<(), Error> {
    if fs::metadata(path)?.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Clone the configured remote and leave the configured branch checked out.
fn clone(config: &GitConfig) -> Result<git2::Repository, Error> {
    let repo = git2::build::RepoBuilder::new()
        .fetch_options(fetch_options(&config.auth))
        .clone(&config.repository, &config.local_path)?;
    checkout_branch(&repo, &config.branch)?;

    Ok(repo)
}

/// Make sure `branch` exists locally and is checked out. A clone checks out
/// the remote's default branch, which is not necessarily the configured one.
fn checkout_branch(repo: &git2::Repository, branch: &str) -> Result<(), Error> {
    let refname = format!("refs/heads/{branch}");
    if repo.find_reference(&refname).is_err() {
        let remote = repo.find_reference(&format!("refs/remotes/{REMOTE}/{branch}"))?;
        let commit = remote.peel_to_commit()?;
        repo.branch(branch, &commit, false)?;
    }
    repo.set_head(&refname)?;
    repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;

    Ok(())
}

/// Bring the working copy up to date with the remote. Only fast-forwards:
/// this store is the sole writer of its branch, so local commits the remote
/// does not have mean something else touched the working copy.
fn pull(repo: &git2::Repository, config: &GitConfig) -> Result<(), Error> {
    let mut remote = repo.find_remote(REMOTE)?;
    remote.fetch(
        &[config.branch.as_str()],
        Some(&mut fetch_options(&config.auth)),
        None,
    )?;

    let fetch_head = repo.find_reference("FETCH_HEAD")?;
    let fetched = repo.reference_to_annotated_commit(&fetch_head)?;
    let (analysis, _) = repo.merge_analysis(&[&fetched])?;

    if analysis.is_up_to_date() {
        log::debug!(target: "storage", "Working copy is already up to date");
        return Ok(());
    }
    if !analysis.is_fast_forward() {
        return Err(Error::Diverged);
    }

    log::info!(
        target: "storage",
        "Fast-forwarding {} to {}", config.branch, fetched.id()
    );
    let refname = format!("refs/heads/{}", config.branch);
    match repo.find_reference(&refname) {
        Ok(mut reference) => {
            reference.set_target(fetched.id(), "quill: fast-forward")?;
        }
        Err(_) => {
            repo.reference(&refname, fetched.id(), true, "quill: fast-forward")?;
        }
    }
    repo.set_head(&refname)?;
    repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;

    Ok(())
}

/// Stage every change in the working copy.
fn stage_all(repo: &git2::Repository) -> Result<(), Error> {
    let mut index = repo.index()?;
    index.add_all(["*"], git2::IndexAddOption::DEFAULT, None)?;
    index.write()?;

    Ok(())
}

/// Commit the staged changes on top of the current `HEAD`.
fn commit(
    repo: &git2::Repository,
    committer: &Committer,
    message: &str,
) -> Result<git2::Oid, Error> {
    let signature = git2::Signature::now(&committer.name, &committer.email)?;
    let tree = repo.find_tree(repo.index()?.write_tree()?)?;
    let parent = repo.head()?.peel_to_commit()?;
    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &[&parent],
    )?;

    Ok(oid)
}

/// Push the configured branch to the remote.
fn push(repo: &git2::Repository, config: &GitConfig) -> Result<(), Error> {
    let refspec = format!(
        "refs/heads/{branch}:refs/heads/{branch}",
        branch = config.branch
    );
    let mut options = git2::PushOptions::new();
    options.remote_callbacks(callbacks(&config.auth));
    repo.find_remote(REMOTE)?
        .push(&[refspec.as_str()], Some(&mut options))?;

    Ok(())
}

/// The commit `HEAD` currently points at.
fn head_commit(repo: &git2::Repository) -> Result<git2::Oid, Error> {
    Ok(repo.head()?.peel_to_commit()?.id())
}

/// Hard-reset the working copy to the given commit, discarding any partial
/// file, staged change or unpushed commit.
fn reset_hard(repo: &git2::Repository, commit: git2::Oid) -> Result<(), Error> {
    let target = repo.find_object(commit, None)?;
    repo.reset(&target, git2::ResetType::Hard, None)?;

    Ok(())
}

/// Credential callbacks for the configured auth method. The credentials are
/// cloned out of the config so the callbacks can outlive it.
fn callbacks(auth: &GitAuth) -> git2::RemoteCallbacks<'static> {
    let mut callbacks = git2::RemoteCallbacks::new();
    match auth {
        GitAuth::Plain { username, password } => {
            let (username, password) = (username.clone(), password.clone());
            callbacks.credentials(move |_url, _username, _allowed| {
                git2::Cred::userpass_plaintext(&username, &password)
            });
        }
        GitAuth::Ssh {
            username,
            private_key_file,
            passphrase,
        } => {
            let username = username.clone();
            let key = private_key_file.clone();
            let passphrase = passphrase.clone();
            callbacks.credentials(move |_url, remote_username, _allowed| {
                git2::Cred::ssh_key(
                    remote_username.unwrap_or(&username),
                    None,
                    &key,
                    passphrase.as_deref(),
                )
            });
        }
    }
    callbacks
}

fn fetch_options(auth: &GitAuth) -> git2::FetchOptions<'static> {
    let mut options = git2::FetchOptions::new();
    options.remote_callbacks(callbacks(auth));
    options
}
