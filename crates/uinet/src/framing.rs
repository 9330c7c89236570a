//! Dual-protocol detection and length-prefixed framing for the backend
//! socket (spec §4.1, §6). The first four bytes of a freshly accepted
//! connection are peeked: if they spell one of the recognized HTTP
//! method prefixes, the connection is an HTTP request; otherwise they're
//! a big-endian `u32` length prefix for a JSON message/batch frame.
//!
//! Unix domain sockets (and named pipes) don't support TCP-style
//! `MSG_PEEK`, so detection here actually consumes the four bytes and
//! hands them back to the caller as part of a [`Peeked`] reader — a
//! `Cursor` over the consumed prefix chained in front of the remaining
//! stream, so nothing downstream ever notices the bytes were read twice.

use std::io::Cursor;

use tokio::io::{AsyncRead, AsyncReadExt, Chain};

/// Four-byte prefixes that mean "this connection is HTTP, not a framed
/// packet" — one entry per method spec.md §4.1 calls out.
const HTTP_METHOD_PREFIXES: [&[u8; 4]; 7] = [
    b"GET ", b"POST", b"PUT ", b"DELE", b"HEAD", b"PATC", b"OPTI",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Http,
    Packet,
}

/// Classifies a four-byte connection prefix per spec.md §4.1 / §8's
/// boundary behavior: `GET ` (and the other listed HTTP method prefixes)
/// routes to HTTP; anything else is a big-endian length prefix.
pub fn classify_prefix(prefix: &[u8; 4]) -> FrameKind {
    if HTTP_METHOD_PREFIXES.iter().any(|p| *p == prefix) {
        FrameKind::Http
    } else {
        FrameKind::Packet
    }
}

/// A connection whose first four bytes have been consumed and
/// classified, with those bytes preserved so they can be replayed to
/// whichever downstream parser (HTTP or packet) the classification
/// selects.
pub struct Peeked<S> {
    pub prefix: [u8; 4],
    pub kind: FrameKind,
    rest: S,
}

impl<S: AsyncRead + Unpin> Peeked<S> {
    /// Reads and classifies the first four bytes of `stream`.
    pub async fn read_from(mut stream: S) -> std::io::Result<Self> {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await?;
        let kind = classify_prefix(&prefix);
        Ok(Self {
            prefix,
            kind,
            rest: stream,
        })
    }

    /// If this connection classified as [`FrameKind::Packet`], the
    /// prefix itself *is* the big-endian length of the first frame (no
    /// replay needed — packet framing has no other use for those bytes).
    pub fn packet_length(&self) -> Option<u32> {
        (self.kind == FrameKind::Packet).then(|| u32::from_be_bytes(self.prefix))
    }

    /// Consumes this value and returns a reader that replays the
    /// consumed prefix ahead of the rest of the stream — for handing an
    /// [`FrameKind::Http`] connection off to an HTTP server unmodified.
    pub fn into_replay_reader(self) -> Chain<Cursor<[u8; 4]>, S> {
        AsyncReadExt::chain(Cursor::new(self.prefix), self.rest)
    }

    /// Consumes this value, returning the remaining unread stream (valid
    /// only for [`FrameKind::Packet`] connections, where the prefix was
    /// entirely the length and carries no payload bytes to replay).
    pub fn into_rest(self) -> S {
        self.rest
    }
}

/// Reads exactly `len` bytes as a single length-prefixed frame body.
pub async fn read_frame_body<S: AsyncRead + Unpin>(
    mut stream: S,
    len: u32,
) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Reads one full length-prefixed frame (4-byte BE length + body) from
/// an already-classified [`FrameKind::Packet`] stream — used for every
/// frame *after* the first on a connection, where there's no more
/// detection ambiguity to resolve.
pub async fn read_next_frame<S: AsyncRead + Unpin>(mut stream: S) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    read_frame_body(stream, u32::from_be_bytes(len_bytes)).await
}
