//! Client events and listener fan-out
//!
//! Events flow from each connection manager to its own listeners first and
//! then to the registry's global listeners. Callback invocations are
//! isolated: one panicking listener never prevents the others from seeing
//! the same event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, warn};

use tether_core::{Connection, ConnectionId, Message, TetherError};

// ----------------------------------------------------------------------------
// Event Type
// ----------------------------------------------------------------------------

/// Events delivered to listeners
#[derive(Debug, Clone)]
pub enum TetherEvent {
    /// A message passed the connection's topic filter
    Message {
        connection_id: ConnectionId,
        message: Message,
    },
    /// A connection's lifecycle snapshot changed
    StateChanged { connection: Connection },
    /// An error was recovered or surfaced on a connection
    Error {
        connection_id: Option<ConnectionId>,
        error: Arc<TetherError>,
    },
}

// ----------------------------------------------------------------------------
// Listener Types
// ----------------------------------------------------------------------------

pub type MessageListener = Arc<dyn Fn(ConnectionId, &Message) + Send + Sync>;
pub type StateListener = Arc<dyn Fn(&Connection) + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(Option<ConnectionId>, &TetherError) + Send + Sync>;

/// Run one listener callback, catching panics so the remaining listeners
/// still fire
pub(crate) fn invoke_isolated(context: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(context, "listener panicked; continuing with remaining listeners");
    }
}

// ----------------------------------------------------------------------------
// Global Listener Set
// ----------------------------------------------------------------------------

/// Registry-level listeners receiving events from every managed connection.
/// Registration appends; iteration works on a snapshot so listeners may be
/// added concurrently with a fan-out in progress.
#[derive(Default)]
pub(crate) struct GlobalListeners {
    message: RwLock<Vec<MessageListener>>,
    state: RwLock<Vec<StateListener>>,
    error: RwLock<Vec<ErrorListener>>,
}

impl GlobalListeners {
    pub fn add_message(&self, listener: MessageListener) {
        self.message
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add_state(&self, listener: StateListener) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add_error(&self, listener: ErrorListener) {
        self.error
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn clear(&self) {
        self.message
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.error
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn dispatch(&self, event: &TetherEvent) {
        match event {
            TetherEvent::Message {
                connection_id,
                message,
            } => {
                let snapshot = self
                    .message
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for listener in snapshot {
                    invoke_isolated("global message listener", || {
                        listener(*connection_id, message)
                    });
                }
            }
            TetherEvent::StateChanged { connection } => {
                let snapshot = self
                    .state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for listener in snapshot {
                    invoke_isolated("global state listener", || listener(connection));
                }
            }
            TetherEvent::Error {
                connection_id,
                error,
            } => {
                warn!(connection_id = ?connection_id, error = %error, "connection error");
                let snapshot = self
                    .error
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for listener in snapshot {
                    invoke_isolated("global error listener", || listener(*connection_id, error));
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
