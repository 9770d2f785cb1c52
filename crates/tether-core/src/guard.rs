//! Call guard: failure isolation for fallible async operations
//!
//! Three-state machine around one protected dependency. Closed passes calls
//! through and counts consecutive failures; at the failure threshold the
//! guard opens and rejects calls outright until the reset timeout elapses,
//! after which exactly one caller is admitted as a recovery probe. Stale
//! failures outside the monitoring window are forgiven before any dispatch.
//!
//! The guard never retries on its own; it only gates whether an attempt is
//! allowed to reach the dependency.

use core::future::Future;
use core::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Policy and State
// ----------------------------------------------------------------------------

/// Fixed policy for one guard instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardPolicy {
    /// Consecutive failures before the guard opens
    pub failure_threshold: u32,
    /// How long an open guard rejects calls before admitting a probe
    pub reset_timeout: Duration,
    /// Failures older than this window are forgiven
    pub monitoring_window: Duration,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(120),
        }
    }
}

/// Current guard state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without reaching the dependency
    Open,
    /// One probe call is in flight
    HalfOpen,
}

/// Error produced by [`CallGuard::call`]: either the guard rejected the
/// call, or the wrapped operation itself failed.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E>
where
    E: std::error::Error,
{
    #[error("call guard is open, retry in {retry_in:?}")]
    Open { retry_in: Duration },
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct GuardInner {
    state: GuardState,
    failure_count: u32,
    last_failure_at: Option<Timestamp>,
    next_attempt_at: Option<Timestamp>,
}

// ----------------------------------------------------------------------------
// Call Guard
// ----------------------------------------------------------------------------

/// Failure-tracking wrapper around one fallible dependency.
///
/// Created once per protected dependency and mutated on every call; recovery
/// to a pristine state is the explicit [`CallGuard::reset`], never a new
/// allocation.
#[derive(Debug)]
pub struct CallGuard<T: TimeSource> {
    policy: GuardPolicy,
    time: T,
    inner: Mutex<GuardInner>,
}

/// Outcome of admission control, decided under the lock
enum Admission {
    /// Closed-state pass-through
    Pass,
    /// This caller won the single half-open probe slot
    Probe,
}

impl<T: TimeSource> CallGuard<T> {
    /// Create a guard with the given policy
    pub fn new(policy: GuardPolicy, time: T) -> Self {
        Self {
            policy,
            time,
            inner: Mutex::new(GuardInner {
                state: GuardState::Closed,
                failure_count: 0,
                last_failure_at: None,
                next_attempt_at: None,
            }),
        }
    }

    /// Execute `op` if the guard admits it, updating the state machine with
    /// the outcome. Rejected calls never invoke `op`.
    pub async fn call<R, E, F, Fut>(&self, op: F) -> Result<R, GuardError<E>>
    where
        E: std::error::Error,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let admission = {
            let now = self.time.now();
            let mut guard = self.inner.lock().await;

            // Stale-failure forgiveness applies regardless of state
            if let Some(last) = guard.last_failure_at {
                if now.duration_since(last) > self.policy.monitoring_window {
                    guard.failure_count = 0;
                }
            }

            match guard.state {
                GuardState::Closed => Admission::Pass,
                GuardState::HalfOpen => {
                    // A probe is already in flight; keep rejecting until it
                    // resolves
                    return Err(GuardError::Open {
                        retry_in: self.retry_in(&guard, now),
                    });
                }
                GuardState::Open => {
                    let next = guard.next_attempt_at.unwrap_or(now);
                    if now < next {
                        return Err(GuardError::Open {
                            retry_in: next.duration_since(now),
                        });
                    }
                    // Single-admission probe slot: the first caller past the
                    // deadline transitions the guard and runs the probe
                    guard.state = GuardState::HalfOpen;
                    Admission::Probe
                }
            }
        };

        // The lock is not held across the dependency call
        let result = op().await;

        let now = self.time.now();
        let mut guard = self.inner.lock().await;
        match result {
            Ok(value) => {
                guard.state = GuardState::Closed;
                guard.failure_count = 0;
                guard.next_attempt_at = None;
                Ok(value)
            }
            Err(err) => {
                guard.failure_count += 1;
                guard.last_failure_at = Some(now);
                match admission {
                    // A failed probe re-opens with a fresh deadline
                    Admission::Probe => {
                        guard.state = GuardState::Open;
                        guard.next_attempt_at = Some(now + self.policy.reset_timeout);
                    }
                    Admission::Pass => {
                        if guard.failure_count >= self.policy.failure_threshold {
                            guard.state = GuardState::Open;
                            guard.next_attempt_at = Some(now + self.policy.reset_timeout);
                        }
                    }
                }
                Err(GuardError::Inner(err))
            }
        }
    }

    /// Unconditionally return to Closed with a zero failure count
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        guard.state = GuardState::Closed;
        guard.failure_count = 0;
        guard.last_failure_at = None;
        guard.next_attempt_at = None;
    }

    /// Current state
    pub async fn state(&self) -> GuardState {
        self.inner.lock().await.state
    }

    /// Current consecutive failure count
    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }

    fn retry_in(&self, guard: &GuardInner, now: Timestamp) -> Duration {
        guard
            .next_attempt_at
            .map(|next| next.duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
