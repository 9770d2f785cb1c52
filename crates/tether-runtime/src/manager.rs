//! Per-connection manager task
//!
//! One tokio task owns each logical connection end to end: the transport
//! link, the topic set, the reconnect backoff, and the per-connection
//! listener lists. All state mutation happens inside the task, so
//! transitions for one connection are serialized by construction, and a
//! pending backoff sleep is cancelled simply by the `select!` picking up a
//! disconnect or reconnect command instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_core::{
    CallGuard, Connection, ConnectionEvent, Message, Result, SubscriptionAction,
    SubscriptionIntent, TetherConfig, TetherError, TimeSource, Topic,
};

use crate::events::{
    invoke_isolated, ErrorListener, MessageListener, StateListener, TetherEvent,
};
use crate::transport::{TransportConnector, TransportEvent, TransportLink};

// ----------------------------------------------------------------------------
// Commands and Handle
// ----------------------------------------------------------------------------

/// Commands the registry sends into a manager task
pub(crate) enum ManagerCommand {
    Subscribe {
        topic: Topic,
        reply: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        topic: Topic,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        message: Message,
        reply: oneshot::Sender<Result<()>>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    AddMessageListener(MessageListener),
    AddStateListener(StateListener),
    AddErrorListener(ErrorListener),
}

/// Registry-side handle to one manager task
pub(crate) struct ConnectionHandle {
    pub(crate) commands: mpsc::Sender<ManagerCommand>,
    pub(crate) snapshot: watch::Receiver<Connection>,
    pub(crate) task: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Where the task's main loop goes next
enum Phase {
    /// About to attempt a transport open
    Connecting,
    /// Socket open, traffic flowing
    Live(Box<dyn TransportLink>),
    /// Waiting out a reconnect delay
    Backoff(Duration),
    /// Disconnected with the retry budget spent; only commands can revive
    Idle,
    /// Task is done
    Stopped,
}

/// Owns the lifecycle of one logical connection
pub(crate) struct ConnectionManager<T: TimeSource + Clone + 'static> {
    connection: Connection,
    connector: Arc<dyn TransportConnector>,
    config: TetherConfig,
    time: T,
    guard: CallGuard<T>,
    commands: mpsc::Receiver<ManagerCommand>,
    events: mpsc::Sender<TetherEvent>,
    snapshot: watch::Sender<Connection>,
    message_listeners: Vec<MessageListener>,
    state_listeners: Vec<StateListener>,
    error_listeners: Vec<ErrorListener>,
}

impl<T: TimeSource + Clone + 'static> ConnectionManager<T> {
    /// Spawn the manager task for `connection` and return the handle
    pub(crate) fn spawn(
        connection: Connection,
        connector: Arc<dyn TransportConnector>,
        config: TetherConfig,
        time: T,
        events: mpsc::Sender<TetherEvent>,
    ) -> ConnectionHandle {
        let (command_tx, command_rx) = mpsc::channel(config.channels.command_buffer);
        let (snapshot_tx, snapshot_rx) = watch::channel(connection.clone());
        let guard = CallGuard::new(config.guard, time.clone());

        let manager = Self {
            connection,
            connector,
            config,
            time,
            guard,
            commands: command_rx,
            events,
            snapshot: snapshot_tx,
            message_listeners: Vec::new(),
            state_listeners: Vec::new(),
            error_listeners: Vec::new(),
        };

        let task = tokio::spawn(manager.run());

        ConnectionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            task,
        }
    }

    async fn run(mut self) {
        info!(id = %self.connection.id, url = %self.connection.url, "connection manager starting");

        let mut phase = Phase::Connecting;
        loop {
            phase = match phase {
                Phase::Connecting => self.attempt_open().await,
                Phase::Live(link) => self.run_live(link).await,
                Phase::Backoff(delay) => self.run_backoff(delay).await,
                Phase::Idle => self.run_idle().await,
                Phase::Stopped => break,
            };
        }

        info!(id = %self.connection.id, "connection manager stopped");
    }

    // ------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------

    /// One transport open attempt, gated by the call guard
    async fn attempt_open(&mut self) -> Phase {
        self.apply_state(ConnectionEvent::OpenStarted).await;

        let connector = self.connector.clone();
        let url = self.connection.url.clone();
        let result = self.guard.call(|| connector.open(&url)).await;

        match result {
            Ok(mut link) => {
                let at = self.time.now();
                self.apply_state(ConnectionEvent::Opened { at }).await;

                // Announce the current topic set on every (re)open
                for topic in self.connection.topics.clone() {
                    if let Err(err) = self
                        .send_intent(&mut link, SubscriptionAction::Subscribe, topic)
                        .await
                    {
                        warn!(id = %self.connection.id, error = %err, "subscription intent failed after open");
                        link.close().await;
                        let at = self.time.now();
                        self.apply_state(ConnectionEvent::Closed { at }).await;
                        return self.after_disconnect().await;
                    }
                }

                Phase::Live(link)
            }
            Err(guard_err) => {
                let error: TetherError = guard_err.into();
                // Recovered locally by the reconnect policy; not an error
                // event unless the retry budget is exhausted
                warn!(id = %self.connection.id, error = %error, "transport open failed");
                let at = self.time.now();
                self.apply_state(ConnectionEvent::OpenFailed { at }).await;
                self.after_disconnect().await
            }
        }
    }

    /// Decide between another backoff round and settling disconnected
    async fn after_disconnect(&mut self) -> Phase {
        if self.connection.state.can_reconnect() {
            let delay = self
                .config
                .reconnect
                .delay_for_attempt(self.connection.state.reconnect_attempts);
            debug!(
                id = %self.connection.id,
                attempts = self.connection.state.reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            Phase::Backoff(delay)
        } else {
            let attempts = self.connection.state.reconnect_attempts;
            warn!(id = %self.connection.id, attempts, "reconnect attempts exhausted");
            self.emit_error(TetherError::RetriesExhausted { attempts })
                .await;
            Phase::Idle
        }
    }

    async fn run_live(&mut self, mut link: Box<dyn TransportLink>) -> Phase {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        None => {
                            link.close().await;
                            return Phase::Stopped;
                        }
                        Some(command) => {
                            if let Some(next) = self.handle_live_command(command, &mut link).await {
                                return next;
                            }
                        }
                    }
                }
                event = link.next_event() => {
                    match event {
                        Some(TransportEvent::Frame(frame)) => {
                            self.handle_frame(&frame).await;
                        }
                        Some(TransportEvent::Closed { reason }) => {
                            info!(id = %self.connection.id, reason = ?reason, "transport closed");
                            let at = self.time.now();
                            self.apply_state(ConnectionEvent::Closed { at }).await;
                            return self.after_disconnect().await;
                        }
                        None => {
                            info!(id = %self.connection.id, "transport stream ended");
                            let at = self.time.now();
                            self.apply_state(ConnectionEvent::Closed { at }).await;
                            return self.after_disconnect().await;
                        }
                    }
                }
            }
        }
    }

    async fn run_backoff(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => {
                    self.apply_state(ConnectionEvent::RetryStarted).await;
                    return Phase::Connecting;
                }
                command = self.commands.recv() => {
                    match command {
                        None => return Phase::Stopped,
                        Some(command) => {
                            if let Some(next) = self.handle_offline_command(command).await {
                                return next;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn run_idle(&mut self) -> Phase {
        loop {
            match self.commands.recv().await {
                None => return Phase::Stopped,
                Some(command) => {
                    if let Some(next) = self.handle_offline_command(command).await {
                        return next;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Command Handling
    // ------------------------------------------------------------------

    /// Handle a command while the link is open. Returns the next phase when
    /// the command ends the live phase.
    async fn handle_live_command(
        &mut self,
        command: ManagerCommand,
        link: &mut Box<dyn TransportLink>,
    ) -> Option<Phase> {
        match command {
            ManagerCommand::Subscribe { topic, reply } => {
                let result = if self.connection.subscribe(topic.clone()) {
                    self.publish_snapshot();
                    self.send_intent(link, SubscriptionAction::Subscribe, topic)
                        .await
                } else {
                    // Already subscribed: a no-op
                    Ok(())
                };
                let _ = reply.send(result);
                None
            }
            ManagerCommand::Unsubscribe { topic, reply } => {
                let result = if self.connection.unsubscribe(&topic) {
                    self.publish_snapshot();
                    self.send_intent(link, SubscriptionAction::Unsubscribe, topic)
                        .await
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
                None
            }
            ManagerCommand::Send { message, reply } => {
                let result = async {
                    let frame = message.to_frame()?;
                    link.send(frame).await?;
                    Ok(())
                }
                .await;
                let _ = reply.send(result);
                None
            }
            ManagerCommand::Reconnect { reply } => {
                info!(id = %self.connection.id, "manual reconnect requested");
                link.close().await;
                let at = self.time.now();
                self.connection.transition(ConnectionEvent::Closed { at });
                self.connection.transition(ConnectionEvent::CounterReset);
                self.publish_state().await;
                let _ = reply.send(Ok(()));
                Some(Phase::Connecting)
            }
            ManagerCommand::Disconnect { reply } => {
                link.close().await;
                let _ = reply.send(());
                Some(Phase::Stopped)
            }
            ManagerCommand::AddMessageListener(listener) => {
                self.message_listeners.push(listener);
                None
            }
            ManagerCommand::AddStateListener(listener) => {
                self.state_listeners.push(listener);
                None
            }
            ManagerCommand::AddErrorListener(listener) => {
                self.error_listeners.push(listener);
                None
            }
        }
    }

    /// Handle a command while disconnected (backoff or idle)
    async fn handle_offline_command(&mut self, command: ManagerCommand) -> Option<Phase> {
        match command {
            ManagerCommand::Subscribe { topic, reply } => {
                if self.connection.subscribe(topic) {
                    self.publish_snapshot();
                }
                let _ = reply.send(Ok(()));
                None
            }
            ManagerCommand::Unsubscribe { topic, reply } => {
                if self.connection.unsubscribe(&topic) {
                    self.publish_snapshot();
                }
                let _ = reply.send(Ok(()));
                None
            }
            ManagerCommand::Send { reply, .. } => {
                let _ = reply.send(Err(TetherError::NotReady {
                    id: self.connection.id,
                }));
                None
            }
            ManagerCommand::Reconnect { reply } => {
                info!(id = %self.connection.id, "manual reconnect requested");
                self.connection.transition(ConnectionEvent::CounterReset);
                self.publish_state().await;
                let _ = reply.send(Ok(()));
                Some(Phase::Connecting)
            }
            ManagerCommand::Disconnect { reply } => {
                let _ = reply.send(());
                Some(Phase::Stopped)
            }
            ManagerCommand::AddMessageListener(listener) => {
                self.message_listeners.push(listener);
                None
            }
            ManagerCommand::AddStateListener(listener) => {
                self.state_listeners.push(listener);
                None
            }
            ManagerCommand::AddErrorListener(listener) => {
                self.error_listeners.push(listener);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Traffic
    // ------------------------------------------------------------------

    /// Route one inbound frame through the topic filter
    async fn handle_frame(&mut self, frame: &str) {
        match Message::from_frame(frame) {
            Ok(message) => {
                if self.connection.should_deliver(&message.topic) {
                    for listener in &self.message_listeners {
                        invoke_isolated("message listener", || {
                            listener(self.connection.id, &message)
                        });
                    }
                    let _ = self
                        .events
                        .send(TetherEvent::Message {
                            connection_id: self.connection.id,
                            message,
                        })
                        .await;
                } else {
                    debug!(
                        id = %self.connection.id,
                        topic = %message.topic,
                        "dropping frame for unsubscribed topic"
                    );
                }
            }
            // Malformed frames are reported, never fatal
            Err(err) => {
                self.emit_error(TetherError::Protocol(err)).await;
            }
        }
    }

    async fn send_intent(
        &self,
        link: &mut Box<dyn TransportLink>,
        action: SubscriptionAction,
        topic: Topic,
    ) -> Result<()> {
        let intent = SubscriptionIntent::new(action, topic, self.time.now());
        let frame = intent.to_frame()?;
        link.send(frame).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    async fn apply_state(&mut self, event: ConnectionEvent) {
        self.connection.transition(event);
        self.publish_state().await;
    }

    /// Push the new snapshot and notify state listeners
    async fn publish_state(&mut self) {
        self.publish_snapshot();
        for listener in &self.state_listeners {
            invoke_isolated("state listener", || listener(&self.connection));
        }
        let _ = self
            .events
            .send(TetherEvent::StateChanged {
                connection: self.connection.clone(),
            })
            .await;
    }

    /// Update the read-side snapshot only (topic set changes)
    fn publish_snapshot(&self) {
        let _ = self.snapshot.send(self.connection.clone());
    }

    async fn emit_error(&mut self, error: TetherError) {
        let error = Arc::new(error);
        for listener in &self.error_listeners {
            invoke_isolated("error listener", || {
                listener(Some(self.connection.id), &error)
            });
        }
        let _ = self
            .events
            .send(TetherEvent::Error {
                connection_id: Some(self.connection.id),
                error,
            })
            .await;
    }
}
