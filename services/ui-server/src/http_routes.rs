//! The frontend-facing HTTP surface: session vending at `/`, the SPA
//! shell and session-routed paths at `/<id>[/<path>]`, and a bare
//! liveness probe — everything that isn't the WebSocket upgrade or the
//! long-poll drain, which live in [`crate::ws`].

use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use tracing::info;

use uibundle::{serve_site, validate_site_request, SiteRequestError};
use uinet::routes::parse_session_route;
use uinet::cookie::set_cookie_header;

use crate::app::AppState;

/// Prefixes the static-site fallback must never shadow.
const RESERVED_PREFIXES: [&str; 3] = ["/ws", "/poll", "/healthz"];

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// `GET /`: vends a fresh session and redirects the browser to its
/// routed URL, binding the session cookie along the way — the one spot
/// a client can arrive at with no session id of its own yet.
pub async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    let vended_id = state.create_session().await;
    info!(vended_id, "vended new session from root request");
    let mut response = Redirect::to(&format!("/{vended_id}")).into_response();
    if let Ok(value) = set_cookie_header(&vended_id.to_string()).parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

/// Catches every other `GET`: `/<id>` and `/<id>/<routed/path>` serve
/// the SPA shell (or a static asset alongside it), registering the
/// routed path against the session for later resolution (e.g. a hosted
/// script runtime's `@route` standard variable).
pub async fn site_fallback(
    method: Method,
    uri: Uri,
    State(state): State<AppState>,
) -> Response {
    let raw_path = match validate_site_request(&method, &uri, &RESERVED_PREFIXES) {
        Ok(path) => path,
        Err(err) => return err.into_response(),
    };

    let Some(route) = parse_session_route(raw_path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Ok(vended_id) = route.vended_id.parse::<u64>() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(internal_id) = state.sessions.get_internal_id(vended_id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    state.sessions.touch_activity(&internal_id).await;

    if let Some(routed_path) = route.routed_path {
        if std::path::Path::new(routed_path).extension().is_none() {
            // No file extension: this is an app route, not a static
            // asset request, so the session remembers it for scripted
            // lookups (`resolve_url_path`) rather than treating it as a
            // file under the site bundle.
            state
                .sessions
                .register_url_path(&internal_id, routed_path, 1)
                .await;
        }
    }

    serve_site(raw_path)
}
