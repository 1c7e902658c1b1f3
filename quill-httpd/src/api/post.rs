use std::collections::BTreeMap;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use url::Url;

use quill::mf2::normalize::{self, FilePart};
use quill::mf2::Value;
use quill::slug;
use quill::storage::{Deletions, Update};

use crate::api::auth::{Credentials, Scope};
use crate::api::error::Error;
use crate::api::{accepted, bearer_token, blocking, created, media_type, read_multipart, Context};

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// A decoded request body, still in its encoding-specific shape. The
/// access token has already been stripped from flat bodies.
enum Body {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<(String, String)>, Vec<FilePart>),
}

impl Body {
    /// Remove every occurrence of a reserved member from the body and
    /// return its first non-empty string value.
    fn take(&mut self, key: &str) -> Option<String> {
        match self {
            Self::Json(serde_json::Value::Object(object)) => match object.remove(key) {
                Some(serde_json::Value::String(value)) if !value.is_empty() => Some(value),
                _ => None,
            },
            Self::Json(_) => None,
            Self::Form(pairs) | Self::Multipart(pairs, _) => {
                let mut taken = None;
                pairs.retain(|(name, value)| {
                    if name != key {
                        return true;
                    }
                    if taken.is_none() && !value.is_empty() {
                        taken = Some(value.clone());
                    }
                    false
                });
                taken
            }
        }
    }
}

/// Dispatch a Micropub action.
/// `POST /`
pub(super) async fn handler(
    State(ctx): State<Context>,
    request: Request,
) -> Result<Response, Error> {
    let header_token = bearer_token(request.headers());
    let (mut body, body_token) = read_body(&ctx, request).await?;
    let action = take_action(&mut body)?;

    blocking(move || {
        let credentials = ctx.credentials(header_token, body_token)?;
        match action.as_str() {
            "create" => create(&ctx, &credentials, body),
            "update" => update(&ctx, &credentials, body),
            "delete" => delete(&ctx, &credentials, body),
            "undelete" => undelete(&ctx, &credentials, body),
            other => Err(Error::InvalidRequest(format!("unknown action {other:?}"))),
        }
    })
    .await
}

/// Decode the request body according to its declared content type. The
/// second value is the access token carried in a flat body, if any.
async fn read_body(ctx: &Context, request: Request) -> Result<(Body, Option<String>), Error> {
    let kind = media_type(request.headers())
        .ok_or_else(|| Error::InvalidRequest("a content type is required".to_owned()))?;
    let limit = ctx.config.server.limits.max_payload_size;

    match kind.as_str() {
        JSON => {
            let bytes = axum::body::to_bytes(request.into_body(), limit)
                .await
                .map_err(|e| Error::InvalidRequest(format!("failed to read request body: {e}")))?;
            let payload = serde_json::from_slice(&bytes)
                .map_err(|e| Error::InvalidRequest(format!("invalid JSON body: {e}")))?;

            Ok((Body::Json(payload), None))
        }
        FORM => {
            let bytes = axum::body::to_bytes(request.into_body(), limit)
                .await
                .map_err(|e| Error::InvalidRequest(format!("failed to read request body: {e}")))?;
            let mut pairs: Vec<(String, String)> =
                url::form_urlencoded::parse(&bytes).into_owned().collect();
            let token = normalize::pop_access_token(&mut pairs);

            Ok((Body::Form(pairs), token))
        }
        MULTIPART => {
            let (mut values, files) = read_multipart(ctx, request).await?;
            let token = normalize::pop_access_token(&mut values);

            Ok((Body::Multipart(values, files), token))
        }
        other => Err(Error::InvalidRequest(format!(
            "unsupported content type {other:?}"
        ))),
    }
}

/// The requested action, removed from the body. Absent means `create`.
fn take_action(body: &mut Body) -> Result<String, Error> {
    if let Body::Json(serde_json::Value::Object(object)) = body {
        return match object.remove("action") {
            None => Ok("create".to_owned()),
            Some(serde_json::Value::String(action)) => Ok(action.to_lowercase()),
            Some(_) => Err(Error::InvalidRequest("action must be a string".to_owned())),
        };
    }
    Ok(body
        .take("action")
        .map(|action| action.to_lowercase())
        .unwrap_or_else(|| "create".to_owned()))
}

fn create(ctx: &Context, credentials: &Credentials, body: Body) -> Result<Response, Error> {
    credentials.require(Scope::Create)?;

    let (mut doc, file) = match body {
        Body::Json(payload) => (normalize::json(payload), None),
        Body::Form(pairs) => (normalize::form(pairs).0, None),
        Body::Multipart(values, files) => {
            let (doc, _, file) = normalize::multipart(values, files)
                .map_err(|e| Error::InvalidRequest(e.to_string()))?;
            (doc, file)
        }
    };
    doc.validate().map_err(|e| Error::InvalidRequest(e.to_string()))?;

    let suggested = doc.take_commands();
    let candidate = suggested.or_else(|| slug::derive(&doc)).ok_or_else(|| {
        Error::InvalidRequest(
            "unable to derive a slug: the document needs a name or content".to_owned(),
        )
    })?;
    let slug = slug::ensure_unique(ctx.store.as_ref(), &candidate);
    doc.properties
        .insert(slug::PROPERTY.to_owned(), vec![Value::String(slug)]);

    // The uploaded file lands in the media store, and its public URL
    // becomes a property named after the field it arrived under.
    if let Some(file) = file {
        let property = file
            .field
            .strip_suffix("[]")
            .unwrap_or(&file.field)
            .to_owned();
        let url = ctx.media.save(file)?;
        doc.properties
            .entry(property)
            .or_default()
            .push(Value::String(url.into()));
    }

    let outcome = ctx.store.create(doc)?;
    if outcome.synchronous {
        Ok(created(&outcome.url))
    } else {
        Ok(accepted(&outcome.url))
    }
}

fn update(ctx: &Context, credentials: &Credentials, body: Body) -> Result<Response, Error> {
    credentials.require(Scope::Update)?;

    let Body::Json(serde_json::Value::Object(mut object)) = body else {
        return Err(Error::InvalidRequest("update requires a JSON body".to_owned()));
    };
    let url = match object.remove("url") {
        Some(serde_json::Value::String(url)) => parse_url(&url)?,
        _ => return Err(Error::InvalidRequest("update requires a url".to_owned())),
    };
    let update = Update {
        replace: property_map(object.remove("replace"), "replace")?,
        add: property_map(object.remove("add"), "add")?,
        delete: deletions(object.remove("delete"))?,
    };

    let resulting = ctx.store.update(&url, update)?;
    if resulting == url {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(created(&resulting))
    }
}

fn delete(ctx: &Context, credentials: &Credentials, mut body: Body) -> Result<Response, Error> {
    credentials.require(Scope::Delete)?;

    let url = target_url(&mut body, "delete")?;
    ctx.store.delete(&url)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

fn undelete(ctx: &Context, credentials: &Credentials, mut body: Body) -> Result<Response, Error> {
    credentials.require(Scope::Undelete)?;

    let url = target_url(&mut body, "undelete")?;
    let outcome = ctx.store.undelete(&url)?;
    if outcome.moved {
        Ok(created(&outcome.url))
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

/// The `url` member naming the object an action applies to. Checked
/// before the store is involved at all.
fn target_url(body: &mut Body, action: &str) -> Result<Url, Error> {
    let url = body
        .take("url")
        .ok_or_else(|| Error::InvalidRequest(format!("{action} requires a url")))?;
    parse_url(&url)
}

fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|e| Error::InvalidRequest(format!("invalid url: {e}")))
}

/// An update's `replace` or `add` member: property names mapped to value
/// sequences, with scalars promoted the same way the structured
/// normalizer promotes them.
fn property_map(
    value: Option<serde_json::Value>,
    what: &str,
) -> Result<BTreeMap<String, Vec<Value>>, Error> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    let serde_json::Value::Object(object) = value else {
        return Err(Error::InvalidRequest(format!("{what} must be an object")));
    };

    Ok(object
        .into_iter()
        .map(|(name, value)| (name, value_sequence(value)))
        .collect())
}

/// An update's `delete` member: either a list of property names or a map
/// from property name to the values to remove.
fn deletions(value: Option<serde_json::Value>) -> Result<Option<Deletions>, Error> {
    match value {
        None => Ok(None),
        Some(serde_json::Value::Array(names)) => {
            let names = names
                .into_iter()
                .map(|name| match name {
                    serde_json::Value::String(name) => Ok(name),
                    _ => Err(Error::InvalidRequest(
                        "delete entries must be property names".to_owned(),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Deletions::Properties(names)))
        }
        Some(serde_json::Value::Object(map)) => Ok(Some(Deletions::Values(
            map.into_iter()
                .map(|(name, value)| (name, value_sequence(value)))
                .collect(),
        ))),
        Some(_) => Err(Error::InvalidRequest(
            "delete must be a list of property names or a map of values".to_owned(),
        )),
    }
}

fn value_sequence(value: serde_json::Value) -> Vec<Value> {
    match value {
        serde_json::Value::Array(list) => list.into_iter().filter_map(Value::from_scalar).collect(),
        value => Value::from_scalar(value).into_iter().collect(),
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use url::Url;

    use quill::mf2::Value;
    use quill::storage::ContentStore;

    use crate::test::{self, multipart, post, RelocatingStore, FORM, JSON, TOKEN};

    #[tokio::test]
    async fn test_create_json() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({
                "type": ["h-entry"],
                "properties": { "name": ["Hello World"] }
            })
            .to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let location = response.location();
        assert!(location.as_str().starts_with("https://example.org/posts/"));
        assert!(location.as_str().ends_with(".json"));

        let object = store.get(&location).unwrap().unwrap();
        assert_eq!(object.document.first_string("name"), Some("Hello World"));
        assert_eq!(object.document.first_string("slug"), Some("hello-world"));
        assert_eq!(object.document.types.first().as_str(), "h-entry");
    }

    #[tokio::test]
    async fn test_create_form() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(FORM),
            "h=entry&name=Hello+World&category[]=a&category[]=b",
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let object = store.get(&response.location()).unwrap().unwrap();
        assert_eq!(object.document.first_string("name"), Some("Hello World"));
        assert_eq!(
            object.document.properties.get("category"),
            Some(&vec!["a".into(), "b".into()])
        );
    }

    #[tokio::test]
    async fn test_create_multipart_saves_file() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let (content_type, body) = multipart(
            &[("h", "entry"), ("name", "Photo post")],
            &[("photo", "sunset.jpg", b"\xff\xd8")],
        );
        let response = post(&app, "/", Some(&content_type), body, Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let object = store.get(&response.location()).unwrap().unwrap();
        assert_eq!(
            object.document.first_string("photo"),
            Some("https://media.example.org/sunset.jpg")
        );
    }

    #[tokio::test]
    async fn test_create_rejects_multiple_files() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let (content_type, body) = multipart(
            &[("name", "Two files")],
            &[("photo", "a.jpg", b"a"), ("video", "b.mp4", b"b")],
        );
        let response = post(&app, "/", Some(&content_type), body, Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.json().await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_create_honors_suggested_slug() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({
                "properties": { "name": ["Hello"], "mp-slug": ["custom-slug"] }
            })
            .to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let object = store.get(&response.location()).unwrap().unwrap();
        assert_eq!(object.document.first_string("slug"), Some("custom-slug"));
        assert!(!object.document.properties.contains_key("mp-slug"));
    }

    #[tokio::test]
    async fn test_create_resolves_slug_collision() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);
        let body = || json!({ "properties": { "name": ["Test"] } }).to_string();

        let first = post(&app, "/", Some(JSON), body(), Some(TOKEN)).await;
        assert_eq!(first.status(), StatusCode::CREATED);
        let second = post(&app, "/", Some(JSON), body(), Some(TOKEN)).await;
        assert_eq!(second.status(), StatusCode::CREATED);

        let object = store.get(&second.location()).unwrap().unwrap();
        let slug = object.document.first_string("slug").unwrap();
        assert!(slug.starts_with("test"));
        assert_ne!(slug, "test");
    }

    #[tokio::test]
    async fn test_create_requires_identifying_content() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({ "properties": { "category": ["a"] } }).to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.json().await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_create_accepts_token_in_form_body() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(FORM),
            format!("h=entry&name=Hi&access_token={TOKEN}"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        // The token never reaches the stored document.
        let object = store.get(&response.location()).unwrap().unwrap();
        assert!(!object.document.properties.contains_key("access_token"));
    }

    #[tokio::test]
    async fn test_update_replaces_properties() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let created = post(
            &app,
            "/",
            Some(JSON),
            json!({ "properties": { "name": ["Old"] } }).to_string(),
            Some(TOKEN),
        )
        .await;
        let url = created.location();

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({
                "action": "update",
                "url": url.as_str(),
                "replace": { "name": ["New"] }
            })
            .to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let object = store.get(&url).unwrap().unwrap();
        assert_eq!(object.document.first_string("name"), Some("New"));
    }

    #[tokio::test]
    async fn test_update_adds_and_deletes() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let created = post(
            &app,
            "/",
            Some(JSON),
            json!({
                "properties": { "name": ["Post"], "category": ["a"], "draft": [true] }
            })
            .to_string(),
            Some(TOKEN),
        )
        .await;
        let url = created.location();

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({
                "action": "update",
                "url": url.as_str(),
                "add": { "category": ["b"] },
                "delete": ["draft"]
            })
            .to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let object = store.get(&url).unwrap().unwrap();
        assert_eq!(
            object.document.properties.get("category"),
            Some(&vec!["a".into(), "b".into()])
        );
        assert!(!object.document.properties.contains_key("draft"));

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({
                "action": "update",
                "url": url.as_str(),
                "delete": { "category": ["a"] }
            })
            .to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let object = store.get(&url).unwrap().unwrap();
        assert_eq!(
            object.document.properties.get("category"),
            Some(&vec![Value::String("b".to_owned())])
        );
    }

    #[tokio::test]
    async fn test_update_requires_json_body() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(FORM),
            "action=update&url=https://example.org/posts/x.json",
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_requires_url() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({ "action": "update", "replace": {} }).to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_unknown_url_is_not_found() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({
                "action": "update",
                "url": "https://example.org/posts/missing.json",
                "replace": { "name": ["x"] }
            })
            .to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.json().await["error"], "not_found");
    }

    #[tokio::test]
    async fn test_update_moved_url_is_created() {
        let target: Url = "https://example.org/posts/moved.json".parse().unwrap();
        let ctx = test::context_with_store(Arc::new(RelocatingStore::new(target.clone())));
        let app = crate::api::router(ctx);

        let created = post(
            &app,
            "/",
            Some(JSON),
            json!({ "properties": { "name": ["Post"] } }).to_string(),
            Some(TOKEN),
        )
        .await;

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({
                "action": "update",
                "url": created.location().as_str(),
                "replace": { "name": ["Moved"] }
            })
            .to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.location(), target);
    }

    #[tokio::test]
    async fn test_undelete_moved_url_is_created() {
        let target: Url = "https://example.org/posts/moved.json".parse().unwrap();
        let ctx = test::context_with_store(Arc::new(RelocatingStore::new(target.clone())));
        let app = crate::api::router(ctx);

        let created = post(
            &app,
            "/",
            Some(JSON),
            json!({ "properties": { "name": ["Post"] } }).to_string(),
            Some(TOKEN),
        )
        .await;
        let url = created.location();

        post(
            &app,
            "/",
            Some(FORM),
            format!("action=delete&url={url}"),
            Some(TOKEN),
        )
        .await;

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({ "action": "undelete", "url": url.as_str() }).to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.location(), target);
    }

    #[tokio::test]
    async fn test_update_rejects_malformed_members() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);
        let url = "https://example.org/posts/x.json";

        for payload in [
            json!({ "action": "update", "url": url, "replace": "nope" }),
            json!({ "action": "update", "url": url, "add": 5 }),
            json!({ "action": "update", "url": url, "delete": [1] }),
            json!({ "action": "update", "url": url, "delete": "name" }),
        ] {
            let response = post(&app, "/", Some(JSON), payload.to_string(), Some(TOKEN)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_delete_and_undelete() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let created = post(
            &app,
            "/",
            Some(JSON),
            json!({ "properties": { "name": ["Post"] } }).to_string(),
            Some(TOKEN),
        )
        .await;
        let url = created.location();

        let response = post(
            &app,
            "/",
            Some(FORM),
            format!("action=delete&url={url}"),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(store.get(&url).unwrap().unwrap().deleted);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({ "action": "undelete", "url": url.as_str() }).to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!store.get(&url).unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_delete_requires_url() {
        let (ctx, store) = test::context();
        let app = crate::api::router(ctx);

        let created = post(
            &app,
            "/",
            Some(JSON),
            json!({ "properties": { "name": ["Post"] } }).to_string(),
            Some(TOKEN),
        )
        .await;

        let response = post(&app, "/", Some(FORM), "action=delete", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.json().await["error"], "invalid_request");

        // Nothing was deleted.
        assert!(!store.get(&created.location()).unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({ "action": "destroy", "url": "https://example.org/x" }).to_string(),
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_requires_content_type() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(&app, "/", None, "h=entry&name=Hi", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_content_type() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(&app, "/", Some("text/plain"), "hello", Some(TOKEN)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({ "properties": { "name": ["Hi"] } }).to_string(),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.json().await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_bad_token_is_forbidden() {
        let (ctx, _) = test::context();
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(JSON),
            json!({ "properties": { "name": ["Hi"] } }).to_string(),
            Some("not-the-token"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.json().await["error"], "forbidden");
    }

    #[tokio::test]
    async fn test_requires_matching_scope() {
        let (ctx, _) = test::context_with_scope("create update");
        let app = crate::api::router(ctx);

        let response = post(
            &app,
            "/",
            Some(FORM),
            "action=delete&url=https://example.org/posts/x.json",
            Some(TOKEN),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.json().await["error"], "insufficient_scope");
    }
}
