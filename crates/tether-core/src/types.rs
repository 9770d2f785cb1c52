//! Core types for the tether client
//!
//! This module defines the fundamental types used throughout the client,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::Add;
use core::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Connection Identifier
// ----------------------------------------------------------------------------

/// Opaque identifier for one logical connection, unique for the process
/// lifetime. The underlying transport socket may be replaced across
/// reconnects; the id stays stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh connection id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Message Identifier
// ----------------------------------------------------------------------------

/// Unique message identifier: generation timestamp plus a random suffix,
/// collision-resistant without a central counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate an id for a message created at `at`
    pub fn generate(at: Timestamp) -> Self {
        use rand::{distributions::Alphanumeric, Rng};

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(9)
            .map(char::from)
            .collect();
        Self(format!("msg-{}-{}", at.as_millis(), suffix))
    }

    /// Wrap an id received off the wire
    pub fn from_wire(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Topic
// ----------------------------------------------------------------------------

/// Routing key messages are published and subscribed under.
///
/// The wildcard topic `"*"` subscribes to everything; matching against a
/// topic set is done by [`crate::connection::Connection::should_deliver`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// The wildcard topic, matching every routing key
    pub const WILDCARD: &'static str = "*";

    /// Create a topic from a routing key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Create the wildcard topic
    pub fn wildcard() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    /// Whether this topic is the wildcard
    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }

    /// Get the raw routing key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(other.as_millis() as u64))
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing timestamps so time-dependent logic (guard cooldowns,
/// state stamps) stays testable with a manually driven clock.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard library implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    pub fn new() -> Self {
        Self
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced time source for deterministic tests
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    millis: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl ManualTimeSource {
    /// Create a clock starting at `millis`
    pub fn starting_at(millis: u64) -> Self {
        Self {
            millis: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(millis)),
        }
    }

    /// Advance the clock
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(
            by.as_millis() as u64,
            std::sync::atomic::Ordering::SeqCst,
        );
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.millis.load(std::sync::atomic::Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
