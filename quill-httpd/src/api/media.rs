use axum::extract::{Request, State};
use axum::response::Response;

use quill::mf2::normalize;

use crate::api::auth::Scope;
use crate::api::error::Error;
use crate::api::{bearer_token, blocking, created, read_multipart, Context};

/// Multipart field that carries the upload.
const FILE_FIELD: &str = "file";

/// Accept a media upload.
/// `POST /media`
pub(super) async fn handler(
    State(ctx): State<Context>,
    request: Request,
) -> Result<Response, Error> {
    let header_token = bearer_token(request.headers());
    let (mut values, files) = read_multipart(&ctx, request).await?;
    let body_token = normalize::pop_access_token(&mut values);
    if header_token.is_some() && body_token.is_some() {
        return Err(Error::InvalidRequest(
            "an access token may be given in the header or the body, not both".to_owned(),
        ));
    }

    let file = normalize::select_file(files, &[FILE_FIELD])
        .map_err(|e| Error::InvalidRequest(e.to_string()))?
        .ok_or_else(|| Error::InvalidRequest("a file part is required".to_owned()))?;

    blocking(move || {
        let credentials = ctx.credentials(header_token, body_token)?;
        credentials.require(Scope::Media)?;

        let url = ctx.media.save(file)?;
        Ok(created(&url))
    })
    .await
}
