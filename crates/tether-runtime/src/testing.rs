//! Stub transport for tests
//!
//! A scriptable [`TransportConnector`]: open outcomes can be queued ahead
//! of time, inbound frames injected into the live link, the link dropped on
//! demand, and every outbound frame is captured for assertions.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_core::TransportError;

use crate::transport::{TransportConnector, TransportEvent, TransportLink};

// ----------------------------------------------------------------------------
// Stub Connector
// ----------------------------------------------------------------------------

/// Scriptable in-memory transport
#[derive(Default)]
pub struct StubConnector {
    /// Outcomes for upcoming opens; once drained, opens succeed
    script: Mutex<VecDeque<Result<(), String>>>,
    /// Every frame written through any link
    sent: Arc<Mutex<Vec<String>>>,
    open_attempts: AtomicUsize,
    /// Event feeds of every opened link, oldest first. Senders are kept
    /// alive so an older link does not observe a spurious close when a
    /// newer one opens; injection targets the most recent.
    links: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
}

impl StubConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `count` open failures ahead of the next successes
    pub fn fail_next_opens(&self, count: usize, reason: &str) {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..count {
            script.push_back(Err(reason.to_string()));
        }
    }

    /// Queue one explicit open success
    pub fn succeed_next_open(&self) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(()));
    }

    /// Feed an inbound frame to the most recently opened link. Returns
    /// false if no link was ever opened or that link is gone.
    pub fn inject_frame(&self, frame: impl Into<String>) -> bool {
        let links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        match links.last() {
            Some(sender) => sender.send(TransportEvent::Frame(frame.into())).is_ok(),
            None => false,
        }
    }

    /// Close the most recently opened link from the remote side
    pub fn drop_link(&self, reason: Option<&str>) -> bool {
        let links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        match links.last() {
            Some(sender) => sender
                .send(TransportEvent::Closed {
                    reason: reason.map(str::to_string),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Frames written through every link so far, in write order
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `open` was invoked (guard rejections never reach the
    /// connector, so they do not count)
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportConnector for StubConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportLink>, TransportError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);

        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Ok(()));

        if let Err(reason) = outcome {
            return Err(TransportError::Open {
                url: url.to_string(),
                reason,
            });
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event_tx);

        Ok(Box::new(StubLink {
            events: event_rx,
            sent: self.sent.clone(),
        }))
    }
}

// ----------------------------------------------------------------------------
// Stub Link
// ----------------------------------------------------------------------------

struct StubLink {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TransportLink for StubLink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        self.events.close();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
