//! Error types for the tether client
//!
//! Errors are carved by concern: transport failures at the socket layer,
//! protocol failures for malformed frames, and the unified [`TetherError`]
//! covering the facade surface contract violations.

use core::time::Duration;

use crate::guard::GuardError;
use crate::types::ConnectionId;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Failures at the transport socket layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open {url}: {reason}")]
    Open { url: String, reason: String },
    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("send failed: {reason}")]
    Send { reason: String },
    #[error("transport closed: {reason}")]
    Closed { reason: String },
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ----------------------------------------------------------------------------
// Protocol Errors
// ----------------------------------------------------------------------------

/// Failures decoding or encoding wire frames. Always recovered locally: a
/// malformed inbound frame is reported as an error event and the connection
/// keeps running.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Unified error for the tether client facade
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection not found: {id}")]
    NotFound { id: ConnectionId },

    #[error("connection not ready: {id}")]
    NotReady { id: ConnectionId },

    #[error("call guard is open, retry in {retry_in:?}")]
    GuardOpen { retry_in: Duration },

    #[error("reconnect attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },

    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("internal channel closed: {context}")]
    ChannelClosed { context: &'static str },
}

impl From<GuardError<TransportError>> for TetherError {
    fn from(err: GuardError<TransportError>) -> Self {
        match err {
            GuardError::Open { retry_in } => TetherError::GuardOpen { retry_in },
            GuardError::Inner(e) => TetherError::Transport(e),
        }
    }
}

pub type Result<T> = core::result::Result<T, TetherError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_error_conversion() {
        let open: TetherError = GuardError::<TransportError>::Open {
            retry_in: Duration::from_secs(3),
        }
        .into();
        assert!(matches!(
            open,
            TetherError::GuardOpen { retry_in } if retry_in == Duration::from_secs(3)
        ));

        let inner: TetherError = GuardError::Inner(TransportError::Send {
            reason: "socket gone".to_string(),
        })
        .into();
        assert!(matches!(inner, TetherError::Transport(_)));
    }

    #[test]
    fn test_error_display() {
        let err = TetherError::NotFound {
            id: crate::types::ConnectionId::generate(),
        };
        assert!(err.to_string().starts_with("connection not found"));
    }
}
