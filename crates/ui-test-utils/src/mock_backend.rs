//! A mock backend connection: connects to the server's Unix backend
//! socket the way a forwarder would, speaking length-prefixed
//! `SessionEnvelope` frames (spec.md §4.1/§6) rather than WebSocket
//! text frames. Generalizes `MockWsServer`'s "bind a throwaway endpoint
//! per test" idea to the client side of a socket the server owns.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use uiproto::SessionEnvelope;

pub struct MockBackendConn {
    stream: UnixStream,
}

impl MockBackendConn {
    pub async fn connect(socket_path: &std::path::Path) -> std::io::Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self { stream })
    }

    pub async fn send_envelope(&mut self, envelope: &SessionEnvelope) -> std::io::Result<()> {
        let body = serde_json::to_vec(envelope).expect("SessionEnvelope always serializes");
        let mut frame = (body.len() as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&body);
        self.stream.write_all(&frame).await
    }

    pub async fn recv_envelope(&mut self) -> std::io::Result<SessionEnvelope> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        serde_json::from_slice(&body)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
