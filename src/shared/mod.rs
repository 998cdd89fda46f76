//! Wire protocol and transports shared by the connection layer.

pub mod memory;
pub mod protocol;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryPeer, MemoryTransport};
pub use protocol::{CancelFrame, InboundFrame, JobId, OutboundFrame, RequestFrame};
pub use transport::Transport;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
