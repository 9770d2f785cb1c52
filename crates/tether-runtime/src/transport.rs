//! Transport socket abstraction
//!
//! The runtime talks to the network through these traits so the connection
//! machinery stays independent of any one socket library. `tether-ws`
//! provides the production WebSocket implementation; tests use the stub
//! connector from [`crate::testing`].

use async_trait::async_trait;

use tether_core::TransportError;

/// Lifecycle events produced by an open transport link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived
    Frame(String),
    /// The link closed, voluntarily or not
    Closed { reason: Option<String> },
}

/// One open socket. Owned exclusively by a single connection manager; the
/// link is replaced wholesale across reconnects.
#[async_trait]
pub trait TransportLink: Send {
    /// Write one text frame
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Next inbound event. `None` means the link is gone and no further
    /// events will arrive.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Close the link. Idempotent.
    async fn close(&mut self);
}

/// Factory opening transport links. A resolved `open` means the socket is
/// established and frames may flow.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError>;
}
