//! Serving the site: either the default embedded assets (folded in from
//! the teacher's `validate_ui_request`/`serve_embedded_ui` pair) or,
//! once one is appended, the bundle's ZIP contents — SPA-fallback to
//! `index.html` for extensionless paths either way.

use std::io::{Read, Seek};
use std::path::Path;

use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use zip::ZipArchive;

use crate::archive::{open_embedded, read_entry};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SiteRequestError {
    NotFound,
    MethodNotAllowed,
}

impl IntoResponse for SiteRequestError {
    fn into_response(self) -> Response {
        match self {
            SiteRequestError::NotFound => StatusCode::NOT_FOUND.into_response(),
            SiteRequestError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        }
    }
}

fn is_blocked_path(raw_path: &str, blocked_prefix: &str) -> bool {
    raw_path == blocked_prefix
        || raw_path
            .strip_prefix(blocked_prefix)
            .is_some_and(|suffix| suffix.starts_with('/'))
}

/// Validates that a site request is a `GET`/`HEAD` outside of any
/// reserved prefix (e.g. `/ws`, `/api`) before serving it as static
/// content.
pub fn validate_site_request<'a>(
    method: &Method,
    uri: &'a Uri,
    blocked_prefixes: &[&str],
) -> Result<&'a str, SiteRequestError> {
    let raw_path = uri.path();

    if blocked_prefixes
        .iter()
        .any(|prefix| is_blocked_path(raw_path, prefix))
    {
        return Err(SiteRequestError::NotFound);
    }

    if *method != Method::GET && *method != Method::HEAD {
        return Err(SiteRequestError::MethodNotAllowed);
    }

    Ok(raw_path)
}

/// Serves `raw_path` out of an already-open ZIP archive (either the
/// embedded bundle or a standalone one), falling back to `index.html`
/// for extensionless paths the way a client-routed SPA expects.
pub fn serve_from_archive<R: Read + Seek>(archive: &mut ZipArchive<R>, raw_path: &str) -> Response {
    let path = raw_path.trim_start_matches('/');

    if let Ok(bytes) = read_entry(archive, path) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (StatusCode::OK, [(header::CONTENT_TYPE, mime.as_ref())], bytes).into_response();
    }

    if Path::new(path).extension().is_none() {
        if let Ok(bytes) = read_entry(archive, "index.html") {
            return (StatusCode::OK, [(header::CONTENT_TYPE, "text/html")], bytes).into_response();
        }
    }

    StatusCode::NOT_FOUND.into_response()
}

/// Serves `raw_path` out of whichever site is available: the bundle
/// appended to the running executable if present, else the
/// `embed-ui`-compiled default asset set, else a placeholder page.
pub fn serve_site(raw_path: &str) -> Response {
    if let Ok(mut archive) = open_embedded() {
        return serve_from_archive(&mut archive, raw_path);
    }

    #[cfg(feature = "embed-ui")]
    {
        crate::assets::serve_embedded(raw_path)
    }
    #[cfg(not(feature = "embed-ui"))]
    {
        non_embedded_placeholder("ui-server")
    }
}

pub fn non_embedded_placeholder(app_name: &str) -> Response {
    Html(format!(
        "<html><body>\
         <h1>{app_name} UI not embedded</h1>\
         <p>Run <code>ui-server bundle &lt;dir&gt;</code> to append a site, \
         or rebuild with <code>--features embed-ui</code>.</p>\
         </body></html>"
    ))
    .into_response()
}
