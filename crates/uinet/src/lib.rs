//! uinet: the dual-protocol backend socket and the small slice of HTTP
//! routing the frontend surface needs (WebSocket path parsing, session
//! URL routing, the session-binding cookie).
//!
//! The backend socket accepts both framed JSON connections (forwarders
//! pushing `create`/`update`/`destroy` batches) and plain HTTP requests
//! (admin/health probes) on the same listener, distinguished by the
//! first four bytes of each connection — see [`framing`].

pub mod cookie;
pub mod framing;
pub mod routes;

use std::path::PathBuf;

use thiserror::Error;

pub use framing::{read_frame_body, read_next_frame, classify_prefix, FrameKind, Peeked};
pub use routes::{parse_session_route, parse_ws_path, SessionRoute};
pub use cookie::{parse_cookie_header, set_cookie_header, SESSION_COOKIE_NAME};

pub use uiproto::{parse_batch, Batch, Message, ProtoError, SessionEnvelope};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol: {0}")]
    Proto(#[from] ProtoError),
    #[error("named-pipe backend not available on this platform")]
    UnsupportedPlatform,
}

pub type NetResult<T> = Result<T, NetError>;

/// Where the backend socket listens. POSIX targets bind a Unix domain
/// socket; non-Unix targets carry the path through for error reporting
/// but cannot actually bind one (see [`NetError::UnsupportedPlatform`]).
#[derive(Debug, Clone)]
pub enum BackendAddr {
    Unix(PathBuf),
}

impl Default for BackendAddr {
    fn default() -> Self {
        Self::Unix(PathBuf::from("/tmp/ui.sock"))
    }
}

#[cfg(unix)]
pub struct BackendListener {
    inner: tokio::net::UnixListener,
}

#[cfg(unix)]
impl BackendListener {
    pub fn bind(addr: &BackendAddr) -> NetResult<Self> {
        let BackendAddr::Unix(path) = addr;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let inner = tokio::net::UnixListener::bind(path)?;
        Ok(Self { inner })
    }

    pub async fn accept(&self) -> NetResult<tokio::net::UnixStream> {
        let (stream, _addr) = self.inner.accept().await?;
        Ok(stream)
    }
}

#[cfg(not(unix))]
pub struct BackendListener;

#[cfg(not(unix))]
impl BackendListener {
    pub fn bind(_addr: &BackendAddr) -> NetResult<Self> {
        Err(NetError::UnsupportedPlatform)
    }
}

/// Decodes one already-length-delimited frame body into a
/// [`SessionEnvelope`] — the shape every framed backend connection sends
/// (spec.md §4.1: `{session, messages}`).
pub fn decode_envelope(body: &[u8]) -> NetResult<SessionEnvelope> {
    Ok(serde_json::from_slice::<SessionEnvelope>(body).map_err(ProtoError::from)?)
}

/// Encodes a [`SessionEnvelope`] as a length-prefixed frame ready to
/// write to a backend connection.
pub fn encode_envelope(envelope: &SessionEnvelope) -> NetResult<Vec<u8>> {
    let body = serde_json::to_vec(envelope).map_err(ProtoError::from)?;
    let mut frame = (body.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(&body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_framing() {
        let envelope = SessionEnvelope {
            session: 42,
            messages: vec![],
        };
        let frame = encode_envelope(&envelope).unwrap();
        let len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        let decoded = decode_envelope(&frame[4..4 + len]).unwrap();
        assert_eq!(decoded.session, 42);
        assert!(decoded.messages.is_empty());
    }

    #[test]
    fn decode_envelope_rejects_malformed_json() {
        assert!(decode_envelope(b"not json").is_err());
    }

    #[test]
    fn default_backend_addr_is_tmp_socket() {
        let BackendAddr::Unix(path) = BackendAddr::default();
        assert_eq!(path, PathBuf::from("/tmp/ui.sock"));
    }
}
