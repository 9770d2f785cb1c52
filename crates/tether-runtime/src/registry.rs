//! Connection registry and service facade
//!
//! Multiplexes many connection manager tasks behind one API and fans events
//! out to listeners. The registry is an explicitly constructed component
//! with a `cleanup()` teardown; tests instantiate independent registries
//! rather than sharing process-global state.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tether_core::{
    Connection, ConnectionId, Message, Result, SystemTimeSource, TetherConfig, TetherError,
    TimeSource, Topic,
};

use crate::events::{ErrorListener, GlobalListeners, MessageListener, StateListener, TetherEvent};
use crate::manager::{ConnectionHandle, ConnectionManager, ManagerCommand};
use crate::transport::TransportConnector;

// ----------------------------------------------------------------------------
// Connection Registry
// ----------------------------------------------------------------------------

/// Service facade over many managed connections.
///
/// Reads (`get_connection`, `get_all_connections`, `is_connected`) work off
/// watch-channel snapshots and never block a connection's progress; writes
/// (`connect`, `disconnect`) serialize per map entry.
pub struct ConnectionRegistry<T: TimeSource + Clone + 'static = SystemTimeSource> {
    connector: Arc<dyn TransportConnector>,
    config: TetherConfig,
    time: T,
    connections: Arc<DashMap<ConnectionId, ConnectionHandle>>,
    listeners: Arc<GlobalListeners>,
    events: mpsc::Sender<TetherEvent>,
    dispatch: JoinHandle<()>,
}

impl ConnectionRegistry<SystemTimeSource> {
    /// Create a registry on the system clock
    pub fn new(connector: Arc<dyn TransportConnector>, config: TetherConfig) -> Result<Self> {
        Self::with_time_source(connector, config, SystemTimeSource::new())
    }
}

impl<T: TimeSource + Clone + 'static> ConnectionRegistry<T> {
    /// Create a registry with an explicit time source (tests drive a manual
    /// clock through here)
    pub fn with_time_source(
        connector: Arc<dyn TransportConnector>,
        config: TetherConfig,
        time: T,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| TetherError::Configuration { reason })?;

        let (events_tx, mut events_rx) = mpsc::channel(config.channels.event_buffer);
        let listeners = Arc::new(GlobalListeners::default());

        // Fan events from every manager out to the global listeners, in
        // arrival order
        let dispatch_listeners = listeners.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                dispatch_listeners.dispatch(&event);
            }
            debug!("event dispatch task stopped");
        });

        Ok(Self {
            connector,
            config,
            time,
            connections: Arc::new(DashMap::new()),
            listeners,
            events: events_tx,
            dispatch,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle Operations
    // ------------------------------------------------------------------

    /// Open a new logical connection. The id is returned immediately; the
    /// transport open (and any reconnects) proceed in the connection's own
    /// task, observable through `get_connection` and the state listeners.
    pub fn connect(
        &self,
        url: impl Into<String>,
        topics: impl IntoIterator<Item = Topic>,
        user_id: Option<String>,
    ) -> ConnectionId {
        let id = ConnectionId::generate();
        let connection = Connection::new(
            id,
            url,
            topics,
            user_id,
            self.config.reconnect.max_attempts,
        );

        info!(id = %id, url = %connection.url, "registering connection");

        let handle = ConnectionManager::spawn(
            connection,
            self.connector.clone(),
            self.config.clone(),
            self.time.clone(),
            self.events.clone(),
        );
        self.connections.insert(id, handle);
        id
    }

    /// Tear down a connection: cancels any pending reconnect, closes the
    /// transport, and removes the connection from tracking.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<()> {
        let (_, handle) = self
            .connections
            .remove(&id)
            .ok_or(TetherError::NotFound { id })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        // A closed channel means the task is already gone, which is fine
        if handle
            .commands
            .send(ManagerCommand::Disconnect { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        let _ = handle.task.await;

        info!(id = %id, "connection removed");
        Ok(())
    }

    /// Explicit reconnect: resets the retry budget and re-runs the connect
    /// sequence, replacing any live socket.
    pub async fn reconnect(&self, id: ConnectionId) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(id, ManagerCommand::Reconnect { reply: reply_tx })
            .await?;
        reply_rx
            .await
            .map_err(|_| TetherError::ChannelClosed { context: "reconnect" })?
    }

    // ------------------------------------------------------------------
    // Traffic Operations
    // ------------------------------------------------------------------

    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(
            id,
            ManagerCommand::Subscribe {
                topic,
                reply: reply_tx,
            },
        )
        .await?;
        reply_rx
            .await
            .map_err(|_| TetherError::ChannelClosed { context: "subscribe" })?
    }

    pub async fn unsubscribe(&self, id: ConnectionId, topic: Topic) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(
            id,
            ManagerCommand::Unsubscribe {
                topic,
                reply: reply_tx,
            },
        )
        .await?;
        reply_rx
            .await
            .map_err(|_| TetherError::ChannelClosed { context: "unsubscribe" })?
    }

    /// Send a message over a connection. Fails `NotReady` unless the
    /// transport is currently open.
    pub async fn send(&self, id: ConnectionId, message: Message) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command(
            id,
            ManagerCommand::Send {
                message,
                reply: reply_tx,
            },
        )
        .await?;
        reply_rx
            .await
            .map_err(|_| TetherError::ChannelClosed { context: "send" })?
    }

    // ------------------------------------------------------------------
    // Read-Only Snapshots
    // ------------------------------------------------------------------

    /// Current snapshot of one connection, or `None` if unknown
    pub fn get_connection(&self, id: ConnectionId) -> Option<Connection> {
        self.connections
            .get(&id)
            .map(|handle| handle.snapshot.borrow().clone())
    }

    /// Snapshots of every managed connection (iteration order unspecified)
    pub fn get_all_connections(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.snapshot.borrow().clone())
            .collect()
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.get_connection(id)
            .map(|connection| connection.is_connected())
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Listener Registration
    // ------------------------------------------------------------------

    /// Register a message listener receiving traffic from every connection
    pub fn on_message(&self, listener: impl Fn(ConnectionId, &Message) + Send + Sync + 'static) {
        self.listeners.add_message(Arc::new(listener));
    }

    /// Register a state listener receiving every connection's transitions
    pub fn on_connection_state_change(
        &self,
        listener: impl Fn(&Connection) + Send + Sync + 'static,
    ) {
        self.listeners.add_state(Arc::new(listener));
    }

    /// Register an error listener receiving every connection's errors
    pub fn on_error(
        &self,
        listener: impl Fn(Option<ConnectionId>, &TetherError) + Send + Sync + 'static,
    ) {
        self.listeners.add_error(Arc::new(listener));
    }

    /// Register a message listener scoped to one connection
    pub async fn on_message_for(
        &self,
        id: ConnectionId,
        listener: impl Fn(ConnectionId, &Message) + Send + Sync + 'static,
    ) -> Result<()> {
        self.command(id, ManagerCommand::AddMessageListener(Arc::new(listener)))
            .await
    }

    /// Register a state listener scoped to one connection
    pub async fn on_state_change_for(
        &self,
        id: ConnectionId,
        listener: impl Fn(&Connection) + Send + Sync + 'static,
    ) -> Result<()> {
        self.command(id, ManagerCommand::AddStateListener(Arc::new(listener)))
            .await
    }

    /// Register an error listener scoped to one connection
    pub async fn on_error_for(
        &self,
        id: ConnectionId,
        listener: impl Fn(Option<ConnectionId>, &TetherError) + Send + Sync + 'static,
    ) -> Result<()> {
        self.command(id, ManagerCommand::AddErrorListener(Arc::new(listener)))
            .await
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Disconnect every managed connection concurrently and clear all
    /// registered listeners. Safe to call with no connections.
    pub async fn cleanup(&self) {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();

        join_all(ids.into_iter().map(|id| self.disconnect(id))).await;
        self.listeners.clear();

        info!("registry cleaned up");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn command(&self, id: ConnectionId, command: ManagerCommand) -> Result<()> {
        let sender = self
            .connections
            .get(&id)
            .map(|handle| handle.commands.clone())
            .ok_or(TetherError::NotFound { id })?;

        sender
            .send(command)
            .await
            .map_err(|_| TetherError::ChannelClosed { context: "manager command" })
    }
}

impl<T: TimeSource + Clone + 'static> Drop for ConnectionRegistry<T> {
    fn drop(&mut self) {
        // Manager tasks stop on their own once the command senders go away
        // with the map; the dispatch task would linger on the registry's
        // event sender, so abort it explicitly.
        self.dispatch.abort();
    }
}
