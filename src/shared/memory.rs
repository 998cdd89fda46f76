//! In-process transport backed by tokio channels.
//!
//! [`MemoryTransport::pair`] returns the client half, which a
//! [`Connection`](crate::Connection) drives, and a [`MemoryPeer`] that plays
//! the remote service: it reads the frames the client sent and writes
//! progress, result and failure frames back.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::shared::transport::Transport;

/// Client half of an in-memory channel.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: Arc<AtomicBool>,
}

/// Remote half of an in-memory channel.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Create a connected client/peer pair.
    pub fn pair() -> (Self, MemoryPeer) {
        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = Self {
            outbound: client_tx,
            inbound: Mutex::new(client_rx),
            closed: closed.clone(),
        };
        let peer = MemoryPeer {
            inbound: peer_rx,
            outbound: Some(peer_tx),
            closed,
        };
        (transport, peer)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn receive(&self) -> Result<Option<String>> {
        let mut inbound = self.inbound.lock().await;
        Ok(inbound.recv().await)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}

impl MemoryPeer {
    /// Wait for the next frame the client sent, decoded as JSON.
    ///
    /// Returns `None` once the client side has gone away.
    pub async fn next_frame(&mut self) -> Option<Value> {
        let text = self.inbound.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Take a frame the client already sent, without waiting.
    pub fn try_next_frame(&mut self) -> Option<Value> {
        let text = self.inbound.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Send a raw text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.outbound
            .as_ref()
            .ok_or(Error::ConnectionClosed)?
            .send(text.into())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Send a JSON frame to the client.
    pub fn send(&self, frame: Value) -> Result<()> {
        self.send_text(frame.to_string())
    }

    /// Send a progress frame.
    pub fn progress(&self, id: u64, progress: Value) -> Result<()> {
        self.send(serde_json::json!({ "id": id, "progress": progress }))
    }

    /// Send a result frame.
    pub fn result(&self, id: u64, result: Value) -> Result<()> {
        self.send(serde_json::json!({ "id": id, "result": result }))
    }

    /// Send a failure frame.
    pub fn error(&self, id: u64, code: i32, message: &str) -> Result<()> {
        self.send(serde_json::json!({
            "id": id,
            "error": { "code": code, "message": message }
        }))
    }

    /// Whether the client closed its half.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the service side. The client observes an orderly close.
    pub fn close(&mut self) {
        self.outbound.take();
    }
}
