use std::fmt;

use serde::Deserialize;
use url::Url;

use crate::api::error::Error;

/// An authorization a bearer token can carry. Every mutating operation
/// requires exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Create,
    Update,
    Delete,
    Undelete,
    Media,
}

impl Scope {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Undelete => "undelete",
            Self::Media => "media",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a verified token is good for, as reported by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// The site owner the token was issued for.
    pub me: Url,
    /// The client application that requested the token.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Space-separated scopes granted to the token.
    #[serde(default)]
    pub scope: String,
}

impl Credentials {
    /// Whether the token grants the given scope.
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scope
            .split_whitespace()
            .any(|s| s.eq_ignore_ascii_case(scope.as_str()))
    }

    /// Require the given scope.
    pub fn require(&self, scope: Scope) -> Result<(), Error> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(Error::InsufficientScope(scope))
        }
    }
}

/// Verifies bearer tokens with whoever issued them.
pub trait Verifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Credentials, Error>;
}

/// Verifies tokens by calling back to the configured IndieAuth token
/// endpoint. Each verification is a blocking HTTP round trip, so callers
/// should run it off the request path.
pub struct TokenEndpoint {
    endpoint: Url,
    me: Url,
}

impl TokenEndpoint {
    pub fn new(endpoint: Url, me: Url) -> Self {
        Self { endpoint, me }
    }
}

impl Verifier for TokenEndpoint {
    fn verify(&self, token: &str) -> Result<Credentials, Error> {
        let response = ureq::get(self.endpoint.as_str())
            .set("Accept", "application/json")
            .set("Authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => {
                    tracing::debug!("Token endpoint rejected a token with status {code}");
                    Error::Forbidden
                }
                e => Error::TokenEndpoint(Box::new(e)),
            })?;

        let credentials: Credentials = response.into_json().map_err(|e| {
            tracing::debug!("Token endpoint returned an unreadable response: {e}");
            Error::Forbidden
        })?;

        if !matches_me(&credentials.me, &self.me) {
            tracing::debug!("Token was issued to {}, not {}", credentials.me, self.me);
            return Err(Error::Forbidden);
        }
        tracing::debug!(
            "Verified a token for {} held by {:?}",
            credentials.me,
            credentials.client_id
        );

        Ok(credentials)
    }
}

/// Whether the token's `me` URL identifies the configured site owner.
/// Comparing parsed URLs keeps spelling differences that normalize away,
/// like a bare host without the trailing slash or an explicit default
/// port, from rejecting a valid token.
fn matches_me(me: &Url, owner: &Url) -> bool {
    me == owner
}
