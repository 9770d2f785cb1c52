//! Client configuration
//!
//! Plain-data configuration with defaults matching the reference policy and
//! a `validate()` pass run before the runtime starts.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::guard::GuardPolicy;

// ----------------------------------------------------------------------------
// Reconnect Policy
// ----------------------------------------------------------------------------

/// Exponential backoff policy for automatic reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on the computed delay
    pub max_delay: Duration,
    /// Automatic attempts before the connection settles disconnected
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for retry number `attempt` (0-based):
    /// `min(base * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay.as_millis() as u64))
    }
}

// ----------------------------------------------------------------------------
// Channel Sizing
// ----------------------------------------------------------------------------

/// Buffer sizes for the internal command and event channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer: 32,
            event_buffer: 128,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-Level Configuration
// ----------------------------------------------------------------------------

/// Configuration for the tether client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TetherConfig {
    pub reconnect: ReconnectConfig,
    pub guard: GuardPolicy,
    pub channels: ChannelConfig,
}

impl TetherConfig {
    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.reconnect.base_delay.is_zero() {
            return Err("reconnect.base_delay must be > 0".to_string());
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            return Err("reconnect.max_delay must be >= reconnect.base_delay".to_string());
        }
        if self.reconnect.max_attempts == 0 {
            return Err("reconnect.max_attempts must be > 0".to_string());
        }
        if self.guard.failure_threshold == 0 {
            return Err("guard.failure_threshold must be > 0".to_string());
        }
        if self.guard.reset_timeout.is_zero() {
            return Err("guard.reset_timeout must be > 0".to_string());
        }
        if self.channels.command_buffer == 0 || self.channels.event_buffer == 0 {
            return Err("channel buffers must be > 0".to_string());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
