//! Tether runtime
//!
//! The async layer of the tether pub/sub client: the transport socket
//! abstraction, the per-connection manager tasks, and the
//! [`ConnectionRegistry`] facade the application talks to.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_core::{TetherConfig, Topic};
//! use tether_runtime::ConnectionRegistry;
//! use tether_runtime::testing::StubConnector;
//!
//! # #[tokio::main]
//! # async fn main() -> tether_core::Result<()> {
//! let registry = ConnectionRegistry::new(Arc::new(StubConnector::new()), TetherConfig::default())?;
//!
//! registry.on_message(|connection_id, message| {
//!     println!("{connection_id}: {} on {}", message.kind, message.topic);
//! });
//!
//! let id = registry.connect("wss://example.test/feed", [Topic::new("general")], None);
//! // ... traffic flows; later:
//! registry.cleanup().await;
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod events;
mod manager;
pub mod registry;
pub mod testing;
pub mod transport;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use events::{ErrorListener, MessageListener, StateListener, TetherEvent};
pub use registry::ConnectionRegistry;
pub use transport::{TransportConnector, TransportEvent, TransportLink};
