//! Connection lifecycle state machine
//!
//! Connection state is an immutable snapshot replaced wholesale on every
//! transition: [`ConnectionState::apply`] consumes the current value and a
//! lifecycle event and produces the next value, which keeps transition
//! auditing and testing trivial. Nothing patches fields in place.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, Timestamp, Topic};

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Lifecycle snapshot of one logical connection.
///
/// Invariant: at most one of `is_connected` / `is_connecting` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub last_connected_at: Option<Timestamp>,
    pub last_disconnected_at: Option<Timestamp>,
    /// Consecutive automatic retry count, reset to 0 on successful open
    pub reconnect_attempts: u32,
    /// Policy ceiling; at the ceiling the connection stays disconnected
    /// until an explicit reconnect resets the counter
    pub max_reconnect_attempts: u32,
}

impl ConnectionState {
    /// Initial state: idle, never connected
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            is_connected: false,
            is_connecting: false,
            last_connected_at: None,
            last_disconnected_at: None,
            reconnect_attempts: 0,
            max_reconnect_attempts,
        }
    }

    /// Whether another automatic reconnect may be scheduled
    pub fn can_reconnect(&self) -> bool {
        self.reconnect_attempts < self.max_reconnect_attempts
    }

    /// Neither connected nor attempting to connect
    pub fn is_idle(&self) -> bool {
        !self.is_connected && !self.is_connecting
    }

    /// Process a lifecycle event and produce the next state (consumes self)
    pub fn apply(self, event: ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::OpenStarted => Self {
                is_connected: false,
                is_connecting: true,
                ..self
            },
            ConnectionEvent::Opened { at } => Self {
                is_connected: true,
                is_connecting: false,
                last_connected_at: Some(at),
                reconnect_attempts: 0,
                ..self
            },
            ConnectionEvent::OpenFailed { at } | ConnectionEvent::Closed { at } => Self {
                is_connected: false,
                is_connecting: false,
                last_disconnected_at: Some(at),
                ..self
            },
            ConnectionEvent::RetryStarted => Self {
                reconnect_attempts: self.reconnect_attempts + 1,
                ..self
            },
            ConnectionEvent::CounterReset => Self {
                reconnect_attempts: 0,
                ..self
            },
        }
    }
}

/// Events that drive connection state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// An open attempt is starting
    OpenStarted,
    /// The transport reported the socket open
    Opened { at: Timestamp },
    /// The open attempt failed before the socket was established
    OpenFailed { at: Timestamp },
    /// An established socket closed
    Closed { at: Timestamp },
    /// A scheduled reconnect attempt is beginning
    RetryStarted,
    /// Explicit reconnect requested; the retry budget starts over
    CounterReset,
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// One logical pub/sub session: identity, endpoint, topic set, and the
/// current lifecycle snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub url: String,
    pub topics: BTreeSet<Topic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub state: ConnectionState,
}

impl Connection {
    /// Create a connection record in the idle state
    pub fn new(
        id: ConnectionId,
        url: impl Into<String>,
        topics: impl IntoIterator<Item = Topic>,
        user_id: Option<String>,
        max_reconnect_attempts: u32,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            topics: topics.into_iter().collect(),
            user_id,
            state: ConnectionState::new(max_reconnect_attempts),
        }
    }

    /// Replace the state snapshot by running the transition function
    pub fn transition(&mut self, event: ConnectionEvent) {
        self.state = self.state.apply(event);
    }

    /// Whether a frame published under `topic` should reach this
    /// connection's listeners: the topic set contains it, or the wildcard.
    pub fn should_deliver(&self, topic: &Topic) -> bool {
        self.topics.contains(topic) || self.topics.contains(&Topic::wildcard())
    }

    /// Add a topic; returns false if it was already subscribed
    pub fn subscribe(&mut self, topic: Topic) -> bool {
        self.topics.insert(topic)
    }

    /// Remove a topic; returns false if it was not subscribed
    pub fn unsubscribe(&mut self, topic: &Topic) -> bool {
        self.topics.remove(topic)
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
