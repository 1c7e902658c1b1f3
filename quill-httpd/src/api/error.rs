use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use url::Url;

use quill::storage;

use crate::api::auth::Scope;

/// Errors surfaced to Micropub clients.
///
/// Every variant maps onto the protocol's error body, `{"error": <code>,
/// "error_description": <text>}`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request is malformed.
    #[error("{0}")]
    InvalidRequest(String),

    /// No access token was presented.
    #[error("an access token is required")]
    Unauthorized,

    /// The presented token failed verification.
    #[error("the access token could not be verified")]
    Forbidden,

    /// The token is missing the scope required by the operation.
    #[error("this operation requires the \"{0}\" scope")]
    InsufficientScope(Scope),

    /// No content is stored at the given URL.
    #[error("no content stored at \"{0}\"")]
    NotFound(Url),

    /// The content at the given URL has been deleted.
    #[error("the content at \"{0}\" has been deleted")]
    Gone(Url),

    /// The token endpoint could not be reached.
    #[error("the token endpoint is unreachable: {0}")]
    TokenEndpoint(#[source] Box<ureq::Error>),

    /// Storage error.
    #[error(transparent)]
    Storage(storage::Error),

    /// A background task died before completing.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        match err {
            storage::Error::NotFound(url) => Self::NotFound(url),
            storage::Error::Document(e) => Self::InvalidRequest(e.to_string()),
            storage::Error::Unsupported(what) => {
                Self::InvalidRequest(format!("{what} is not supported by this endpoint"))
            }
            err => Self::Storage(err),
        }
    }
}

impl Error {
    /// Micropub error code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InsufficientScope(_) => "insufficient_scope",
            Self::NotFound(_) => "not_found",
            Self::Gone(_) => "gone",
            Self::TokenEndpoint(_) | Self::Storage(_) | Self::Task(_) => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::InsufficientScope(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gone(_) => StatusCode::GONE,
            Self::TokenEndpoint(_) | Self::Storage(_) | Self::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Error: {}", self);
        }

        let body = Json(json!({
            "error": self.code(),
            "error_description": self.to_string(),
        }));

        (status, body).into_response()
    }
}
