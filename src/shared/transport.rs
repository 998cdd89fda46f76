//! Transport abstraction for the persistent duplex channel.
//!
//! A transport moves whole JSON text frames. It knows nothing about job ids,
//! registries or notices; the [`Connection`](crate::Connection) drives it.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::Result;

/// A duplex, message-oriented channel to the remote service.
///
/// Methods take `&self` so that one task can block in
/// [`receive`](Transport::receive) while another task sends. Implementations
/// guard each direction independently.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send one text frame.
    async fn send(&self, frame: String) -> Result<()>;

    /// Receive the next text frame.
    ///
    /// Returns `Ok(None)` when the peer closed the channel in an orderly way.
    async fn receive(&self) -> Result<Option<String>>;

    /// Close the channel. Further sends fail.
    async fn close(&self) -> Result<()>;

    /// Whether the channel is still usable.
    fn is_connected(&self) -> bool;

    /// Short name used in log output.
    fn transport_type(&self) -> &'static str;
}
