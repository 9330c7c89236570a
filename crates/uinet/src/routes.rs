//! Path parsing for the frontend-facing HTTP surface: the WebSocket
//! upgrade endpoint (`/ws/<sessionID>`) and the session URL routing
//! spec.md §4.3 describes (`GET /` redirects to a freshly vended
//! session, `GET /<id>[/<path>]` serves the SPA shell with `<id>` bound
//! as the session's routed path).

/// Extracts the vended session id from a `/ws/<sessionID>` request path.
pub fn parse_ws_path(path: &str) -> Option<&str> {
    path.strip_prefix("/ws/")
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

/// A parsed session-routed URL: the vended id and whatever path
/// remained after it, e.g. `/42/settings/profile` -> `("42",
/// Some("settings/profile"))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoute<'a> {
    pub vended_id: &'a str,
    pub routed_path: Option<&'a str>,
}

/// Parses `GET /<id>[/<path>]` requests, per spec.md §4.3. Returns
/// `None` for the bare `/` root (callers treat that as "vend a new
/// session and redirect" rather than a route to resolve).
pub fn parse_session_route(path: &str) -> Option<SessionRoute<'_>> {
    let trimmed = path.strip_prefix('/')?;
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once('/') {
        Some((id, rest)) if !id.is_empty() => Some(SessionRoute {
            vended_id: id,
            routed_path: Some(rest).filter(|r| !r.is_empty()),
        }),
        Some(_) => None,
        None => Some(SessionRoute {
            vended_id: trimmed,
            routed_path: None,
        }),
    }
}
