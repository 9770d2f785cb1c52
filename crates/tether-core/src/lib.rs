//! Core types and policies for the tether pub/sub client
//!
//! This crate provides the foundational value types, the connection
//! lifecycle state machine, the call guard, configuration, the error
//! taxonomy, and the local-first syncing repository. It performs no I/O;
//! the async runtime layer lives in `tether-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod connection;
pub mod errors;
pub mod guard;
pub mod message;
pub mod repository;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ChannelConfig, ReconnectConfig, TetherConfig};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use errors::{ProtocolError, Result, TetherError, TransportError};
pub use guard::{CallGuard, GuardError, GuardPolicy, GuardState};
pub use message::{Message, SubscriptionAction, SubscriptionIntent};
pub use types::{
    ConnectionId, ManualTimeSource, MessageId, SystemTimeSource, TimeSource, Timestamp, Topic,
};
