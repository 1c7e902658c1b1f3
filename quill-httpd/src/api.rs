pub mod auth;
pub(crate) mod error;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::multipart::Multipart;
use axum::extract::{DefaultBodyLimit, FromRequest, Request};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{self, CorsLayer};
use url::Url;

use quill::mf2::normalize::FilePart;
use quill::storage::{ContentStore, MediaStore};
use quill::Config;

use auth::{Credentials, Verifier};
use error::Error;

mod media;
mod post;
mod query;

#[derive(Clone)]
pub struct Context {
    config: Arc<Config>,
    store: Arc<dyn ContentStore>,
    media: Arc<dyn MediaStore>,
    verifier: Arc<dyn Verifier>,
}

impl Context {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ContentStore>,
        media: Arc<dyn MediaStore>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            config,
            store,
            media,
            verifier,
        }
    }

    /// URL of the media upload endpoint.
    pub fn media_endpoint(&self) -> String {
        format!(
            "{}/media",
            self.config.server.public_url.as_str().trim_end_matches('/')
        )
    }

    /// Verify the bearer token, preferring one from the `Authorization`
    /// header over one carried in the request body.
    fn credentials(
        &self,
        header: Option<String>,
        body: Option<String>,
    ) -> Result<Credentials, Error> {
        let token = header.or(body).ok_or(Error::Unauthorized)?;
        self.verifier.verify(&token)
    }
}

pub fn router(ctx: Context) -> Router {
    let limits = ctx.config.server.limits;

    Router::new()
        .route("/", get(query::handler).post(post::handler))
        .route("/media", post(media::handler))
        .layer(DefaultBodyLimit::max(limits.max_multipart_size))
        .layer(
            CorsLayer::new()
                .max_age(Duration::from_secs(86400))
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([CONTENT_TYPE, AUTHORIZATION]),
        )
        .with_state(ctx)
}

/// The token given in the `Authorization: Bearer` header, if any.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_owned())
}

/// Declared media type of the request, lower-cased and stripped of
/// parameters such as the multipart boundary.
fn media_type(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let kind = content_type.split(';').next().unwrap_or_default().trim();
    (!kind.is_empty()).then(|| kind.to_ascii_lowercase())
}

/// `201 Created` pointing at published content.
fn created(url: &Url) -> Response {
    (StatusCode::CREATED, [(LOCATION, url.to_string())]).into_response()
}

/// `202 Accepted` pointing at content whose publication is still underway.
fn accepted(url: &Url) -> Response {
    (StatusCode::ACCEPTED, [(LOCATION, url.to_string())]).into_response()
}

/// Run a blocking store or token-endpoint call off the request path. The
/// task runs to completion even if the request is dropped midway, so a
/// cancelled client can never leave a half-staged working copy behind.
async fn blocking<T, F>(f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Read a multipart body, separating value fields from file parts. Files
/// are size-checked here; which fields may carry one is for the caller to
/// decide.
async fn read_multipart(
    ctx: &Context,
    request: Request,
) -> Result<(Vec<(String, String)>, Vec<FilePart>), Error> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        Error::InvalidRequest(format!("failed to read multipart form: {e}"))
    };
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| Error::InvalidRequest(format!("expected a multipart form: {e}")))?;

    let mut values = Vec::new();
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_owned();
        if let Some(filename) = field.file_name() {
            let filename = filename.to_owned();
            let content_type = field.content_type().map(ToOwned::to_owned);
            let content = field.bytes().await.map_err(invalid)?;
            if content.len() > ctx.config.server.limits.max_file_size {
                return Err(Error::InvalidRequest(format!(
                    "file {filename:?} exceeds the maximum size"
                )));
            }
            files.push(FilePart {
                field: name,
                filename,
                content_type,
                content: content.to_vec(),
            });
        } else {
            values.push((name, field.text().await.map_err(invalid)?));
        }
    }

    Ok((values, files))
}
