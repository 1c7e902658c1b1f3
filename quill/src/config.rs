use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while reading the configuration.
    #[error("configuration I/O error: {0}")]
    Io(#[from] io::Error),
    /// JSON decoding error.
    #[error("configuration JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Semantic error in the configuration.
    #[error("configuration error: {0}")]
    Custom(String),
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub server: Server,
    pub micropub: Micropub,
    pub content: Content,
}

impl Config {
    /// Load the configuration from the given file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config = serde_json::from_reader(fs::File::open(path)?)?;

        Ok(config)
    }

    /// Check invariants that can't be expressed in the schema.
    pub fn validate(&self) -> Result<(), Error> {
        self.server.limits.validate()?;
        for url in [&self.server.public_url, &self.micropub.me_url] {
            validate_base_url(url)?;
        }

        match self.content.strategy {
            Strategy::Git => {
                let Some(git) = &self.content.git else {
                    return Err(Error::Custom(
                        "the \"git\" content strategy requires a content.git section".to_owned(),
                    ));
                };
                git.validate()
            }
            Strategy::Memory => {
                let Some(memory) = &self.content.memory else {
                    return Err(Error::Custom(
                        "the \"memory\" content strategy requires a content.memory section"
                            .to_owned(),
                    ));
                };
                validate_base_url(&memory.public_url)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Address to listen on.
    #[serde(default = "defaults::listen")]
    pub listen: SocketAddr,
    /// Public base URL of this endpoint.
    pub public_url: Url,
    #[serde(default)]
    pub limits: Limits,
}

/// Request size limits, in bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    #[serde(default = "defaults::max_payload_size")]
    pub max_payload_size: usize,
    #[serde(default = "defaults::max_file_size")]
    pub max_file_size: usize,
    #[serde(default = "defaults::max_multipart_size")]
    pub max_multipart_size: usize,
}

impl Limits {
    fn validate(&self) -> Result<(), Error> {
        if self.max_payload_size == 0 || self.max_file_size == 0 || self.max_multipart_size == 0 {
            return Err(Error::Custom("request size limits must be non-zero".to_owned()));
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_payload_size: defaults::max_payload_size(),
            max_file_size: defaults::max_file_size(),
            max_multipart_size: defaults::max_multipart_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Micropub {
    /// Identity URL that verified tokens must belong to.
    pub me_url: Url,
    /// IndieAuth token endpoint used to verify bearer tokens.
    pub token_endpoint: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryConfig>,
}

/// Content storage strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Git,
    Memory,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    /// Remote repository URL, as configured for its `origin` remote.
    pub repository: String,
    /// Local working copy path. Must be absolute; the service owns this
    /// directory and may wipe and re-create it.
    pub local_path: PathBuf,
    /// Sub-path inside the repository where content files live.
    #[serde(default = "defaults::content_path")]
    pub path: String,
    /// Public base URL under which stored content is addressed.
    pub public_url: Url,
    #[serde(default = "defaults::branch")]
    pub branch: String,
    pub auth: GitAuth,
    #[serde(default)]
    pub committer: Committer,
}

impl GitConfig {
    fn validate(&self) -> Result<(), Error> {
        if !self.local_path.is_absolute() {
            return Err(Error::Custom(format!(
                "content.git.localPath {:?} must be absolute",
                self.local_path
            )));
        }
        if Path::new(&self.path)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::Custom(format!(
                "content.git.path {:?} must be a plain relative path",
                self.path
            )));
        }
        if self.branch.is_empty() {
            return Err(Error::Custom("content.git.branch must not be empty".to_owned()));
        }
        validate_base_url(&self.public_url)
    }
}

/// Credentials used for clone, fetch and push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum GitAuth {
    #[serde(rename_all = "camelCase")]
    Plain { username: String, password: String },
    #[serde(rename_all = "camelCase")]
    Ssh {
        username: String,
        private_key_file: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

/// Signature used for content commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Default for Committer {
    fn default() -> Self {
        Self {
            name: "quill".to_owned(),
            email: "quill@localhost".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Public base URL under which stored content is addressed.
    pub public_url: Url,
}

fn validate_base_url(url: &Url) -> Result<(), Error> {
    if url.cannot_be_a_base() {
        return Err(Error::Custom(format!("{url} cannot be used as a base URL")));
    }
    Ok(())
}

mod defaults {
    use std::net::SocketAddr;

    pub(super) fn listen() -> SocketAddr {
        ([0, 0, 0, 0], 8080).into()
    }

    pub(super) fn max_payload_size() -> usize {
        1024 * 1024
    }

    pub(super) fn max_file_size() -> usize {
        10 * 1024 * 1024
    }

    pub(super) fn max_multipart_size() -> usize {
        32 * 1024 * 1024
    }

    pub(super) fn content_path() -> String {
        "posts".to_owned()
    }

    pub(super) fn branch() -> String {
        "main".to_owned()
    }
}

#[cfg(test)]
mod test {
    use std::io::Write as _;

    use pretty_assertions::assert_eq;

    use super::*;

    fn config(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    const GIT_CONFIG: &str = r#"{
        "server": {
            "listen": "127.0.0.1:9090",
            "publicUrl": "https://example.org"
        },
        "micropub": {
            "meUrl": "https://example.org",
            "tokenEndpoint": "https://tokens.example.org/token"
        },
        "content": {
            "strategy": "git",
            "git": {
                "repository": "git@forge.example.org:alice/site.git",
                "localPath": "/var/lib/quill/site",
                "publicUrl": "https://example.org/posts",
                "auth": {
                    "method": "ssh",
                    "username": "git",
                    "privateKeyFile": "/etc/quill/id_ed25519"
                }
            }
        }
    }"#;

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GIT_CONFIG.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:9090".parse().unwrap());
        let git = config.content.git.unwrap();
        assert_eq!(git.branch, "main");
        assert_eq!(git.path, "posts");
        assert_eq!(git.committer.name, "quill");
        assert!(matches!(git.auth, GitAuth::Ssh { passphrase: None, .. }));
    }

    #[test]
    fn test_defaults() {
        let config = config(GIT_CONFIG);
        assert_eq!(config.server.limits.max_payload_size, 1024 * 1024);
        assert_eq!(config.server.limits.max_file_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_plain_auth() {
        let auth: GitAuth = serde_json::from_str(
            r#"{ "method": "plain", "username": "alice", "password": "hunter2" }"#,
        )
        .unwrap();
        assert!(matches!(auth, GitAuth::Plain { .. }));
    }

    #[test]
    fn test_validate_requires_strategy_section() {
        let mut config = config(GIT_CONFIG);
        config.content.git = None;
        assert!(config.validate().is_err());

        config.content.strategy = Strategy::Memory;
        assert!(config.validate().is_err());

        config.content.memory = Some(MemoryConfig {
            public_url: "https://example.org/posts".parse().unwrap(),
        });
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_relative_local_path() {
        let mut config = config(GIT_CONFIG);
        config.content.git.as_mut().unwrap().local_path = "site".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_traversal_in_content_path() {
        let mut config = config(GIT_CONFIG);
        config.content.git.as_mut().unwrap().path = "../outside".to_owned();
        assert!(config.validate().is_err());

        config.content.git.as_mut().unwrap().path = "a/b".to_owned();
        config.validate().unwrap();
    }
}
