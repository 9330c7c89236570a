use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message as WsFrame;
use tokio_tungstenite::MaybeTlsStream;

use uiproto::{parse_batch, Batch, Message};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A frontend WebSocket client for driving the server in integration
/// tests, speaking `uiproto::Message`/`Batch` over the session WS
/// endpoint rather than this repo's backend-socket framing.
pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, WsFrame>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_message(&mut self, msg: &Message) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(msg)?;
        self.write.send(WsFrame::Text(json.into())).await?;
        Ok(())
    }

    pub async fn send_batch(&mut self, batch: &Batch) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(batch)?;
        self.write.send(WsFrame::Text(json.into())).await?;
        Ok(())
    }

    /// Reads the next non-control frame and parses it as a batch (a
    /// single message arrives as a one-element batch — see
    /// `uiproto::parse_batch`).
    pub async fn recv_batch(&mut self) -> Result<Batch, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(WsFrame::Text(text))) => return Ok(parse_batch(text.as_bytes())?),
                Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => continue,
                Some(Ok(WsFrame::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    pub async fn recv_message(&mut self) -> Result<Message, Box<dyn std::error::Error>> {
        let mut batch = self.recv_batch().await?;
        if batch.len() != 1 {
            return Err(format!("expected single message, got batch of {}", batch.len()).into());
        }
        Ok(batch.remove(0))
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(WsFrame::Close(None)).await?;
        Ok(())
    }
}
