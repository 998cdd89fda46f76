//! WebSocket transport.
//!
//! Each WebSocket text message carries one JSON frame. Binary messages are
//! accepted when they hold UTF-8 text; control frames are handled by
//! tungstenite and never surface here.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, Result};
use crate::shared::transport::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client WebSocket transport.
#[derive(Debug)]
pub struct WebSocketTransport {
    url: Url,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    /// Connect to `url`, failing if the handshake does not finish within
    /// `timeout`.
    pub async fn connect(url: &Url, timeout: Duration) -> Result<Self> {
        match url.scheme() {
            "ws" | "wss" => {},
            other => {
                return Err(Error::transport(format!(
                    "unsupported URL scheme {other:?}, expected ws or wss"
                )))
            },
        }

        let (socket, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| Error::Timeout(timeout))?
                .map_err(Error::transport)?;

        tracing::info!(url = %url, "WebSocket connected");

        let (sink, stream) = socket.split();
        Ok(Self {
            url: url.clone(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            connected: AtomicBool::new(true),
        })
    }

    /// The URL this transport connected to.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(frame))
            .await
            .map_err(Error::transport)
    }

    async fn receive(&self) -> Result<Option<String>> {
        let mut stream = self.stream.lock().await;
        loop {
            let Some(message) = stream.next().await else {
                self.connected.store(false, Ordering::Release);
                return Ok(None);
            };
            match message.map_err(Error::transport)? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(bytes) => {
                    let text = String::from_utf8(bytes.to_vec())
                        .map_err(|e| Error::invalid_frame(format!("binary frame: {e}")))?;
                    return Ok(Some(text));
                },
                Message::Close(frame) => {
                    tracing::debug!(?frame, "WebSocket closed by peer");
                    self.connected.store(false, Ordering::Release);
                    return Ok(None);
                },
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::AcqRel) {
            let mut sink = self.sink.lock().await;
            sink.close().await.map_err(Error::transport)?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn transport_type(&self) -> &'static str {
        "websocket"
    }
}
