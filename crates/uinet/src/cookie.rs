//! Session-binding cookie. Set on the initial HTTP handshake so tab URL
//! changes (spec.md §4.3's routed paths) don't lose the session the tab
//! is bound to (spec.md §4.5 "connection ownership"). Hand-rolled rather
//! than pulled from a cookie crate, matching the teacher's preference
//! for a bare `Set-Cookie` header over a dependency for one field.

pub const SESSION_COOKIE_NAME: &str = "ui_session";

/// Builds a `Set-Cookie` header value binding `vended_id` to the
/// browser. `HttpOnly` and `SameSite=Lax` since this cookie is read only
/// by the server, never by page script.
pub fn set_cookie_header(vended_id: &str) -> String {
    format!("{SESSION_COOKIE_NAME}={vended_id}; Path=/; HttpOnly; SameSite=Lax")
}

/// Extracts this crate's session cookie value from a raw `Cookie` header.
pub fn parse_cookie_header(header_value: &str) -> Option<&str> {
    header_value.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE_NAME).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_set_cookie_header() {
        let header = set_cookie_header("482910");
        assert!(header.starts_with("ui_session=482910;"));
        assert!(header.contains("HttpOnly"));
    }

    #[test]
    fn parses_cookie_header_among_others() {
        let raw = "foo=bar; ui_session=482910; other=baz";
        assert_eq!(parse_cookie_header(raw), Some("482910"));
    }

    #[test]
    fn missing_cookie_returns_none() {
        assert_eq!(parse_cookie_header("foo=bar"), None);
    }
}
