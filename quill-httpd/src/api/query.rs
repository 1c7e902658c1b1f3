use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use url::Url;

use crate::api::error::Error;
use crate::api::{bearer_token, blocking, Context};

/// Answer a Micropub query.
/// `GET /`
pub(super) async fn handler(
    State(ctx): State<Context>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Response, Error> {
    let token = bearer_token(&headers);
    let pairs: Vec<(String, String)> =
        url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();

    blocking(move || {
        ctx.credentials(token, None)?;

        let q = first(&pairs, "q")
            .ok_or_else(|| Error::InvalidRequest("a q parameter is required".to_owned()))?;
        match q {
            "config" => Ok(config(&ctx)),
            "source" => source(&ctx, &pairs),
            "syndicate-to" => Ok(syndicate_to()),
            other => Err(Error::InvalidRequest(format!("unknown query {other:?}"))),
        }
    })
    .await
}

/// The endpoint's capabilities.
fn config(ctx: &Context) -> Response {
    Json(json!({
        "media-endpoint": ctx.media_endpoint(),
        "syndicate-to": [],
    }))
    .into_response()
}

/// Syndication targets. This endpoint never syndicates on its own.
fn syndicate_to() -> Response {
    Json(json!({ "syndicate-to": [] })).into_response()
}

/// The stored source of a published object, optionally filtered down to a
/// requested subset of properties.
fn source(ctx: &Context, pairs: &[(String, String)]) -> Result<Response, Error> {
    let url = first(pairs, "url")
        .ok_or_else(|| Error::InvalidRequest("a source query requires a url".to_owned()))?;
    let url = Url::parse(url).map_err(|e| Error::InvalidRequest(format!("invalid url: {e}")))?;

    let object = ctx
        .store
        .get(&url)?
        .ok_or_else(|| Error::NotFound(url.clone()))?;
    if object.deleted {
        return Err(Error::Gone(url));
    }

    let requested: Vec<&str> = pairs
        .iter()
        .filter(|(name, _)| name.strip_suffix("[]").unwrap_or(name) == "properties")
        .map(|(_, value)| value.as_str())
        .collect();

    let mut doc = object.document;
    if requested.is_empty() {
        Ok(Json(doc).into_response())
    } else {
        doc.properties
            .retain(|name, _| requested.contains(&name.as_str()));
        Ok(Json(json!({ "properties": doc.properties })).into_response())
    }
}

fn first<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}
