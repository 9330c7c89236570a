//! Default embedded site, compiled in only when built with `embed-ui`
//! against a real site directory (`static/` at this crate's root by
//! default). Exactly the teacher's `UiAssets` / `rust_embed::Embed`
//! pattern, generalized from one fixed SPA to whichever folder the
//! build points `folder` at.

#![cfg(feature = "embed-ui")]

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "static/"]
pub struct UiAssets;

pub fn serve_embedded(raw_path: &str) -> Response {
    let path = raw_path.trim_start_matches('/');

    if let Some(file) = UiAssets::get(path) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (StatusCode::OK, [(header::CONTENT_TYPE, mime.as_ref())], file.data).into_response();
    }

    if std::path::Path::new(path).extension().is_none() {
        if let Some(index) = UiAssets::get("index.html") {
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html")],
                index.data,
            )
                .into_response();
        }
    }

    StatusCode::NOT_FOUND.into_response()
}
