//! Local-first syncing repository
//!
//! Policy layer over a local store and a remote data source: reads are
//! served locally, writes go remote-first and degrade to local-only when the
//! remote is unavailable. Local-only creates are recorded in a pending-sync
//! outbox keyed by the synthesized id; replay is left to the host.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::{TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Entity Identity
// ----------------------------------------------------------------------------

/// Identity of a repository entity. Normally remote-assigned; when a create
/// falls back to local-only, a timestamp-derived id is synthesized instead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Synthesize a local-only id for a create that could not reach the
    /// remote store
    pub fn synthesize(at: Timestamp) -> Self {
        use rand::{distributions::Alphanumeric, Rng};

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        Self(format!("local-{}-{}", at.as_millis(), suffix))
    }

    /// Whether this id was synthesized locally
    pub fn is_local(&self) -> bool {
        self.0.starts_with("local-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An entity the repository can sync
pub trait Entity: Clone + Send + Sync + 'static {
    fn id(&self) -> EntityId;
    fn set_id(&mut self, id: EntityId);
    /// Stamp a local modification time
    fn touch(&mut self, at: Timestamp);
}

// ----------------------------------------------------------------------------
// Store Traits
// ----------------------------------------------------------------------------

/// Failure reaching or using the remote data source
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("remote rejected the operation: {reason}")]
    Rejected { reason: String },
}

/// Durable local store, the source of truth for reads
#[async_trait]
pub trait LocalStore<E: Entity>: Send + Sync {
    async fn list(&self) -> Vec<E>;
    async fn get(&self, id: &EntityId) -> Option<E>;
    async fn put(&self, entity: E);
    async fn remove(&self, id: &EntityId) -> bool;
    async fn clear(&self);
}

/// Remote data source; every operation may fail
#[async_trait]
pub trait RemoteStore<E: Entity>: Send + Sync {
    async fn list(&self) -> Result<Vec<E>, RemoteError>;
    async fn get(&self, id: &EntityId) -> Result<Option<E>, RemoteError>;
    /// Create and return the entity with its remote-assigned identity
    async fn create(&self, entity: E) -> Result<E, RemoteError>;
    /// Update and return the authoritative remote result
    async fn update(&self, id: &EntityId, entity: E) -> Result<E, RemoteError>;
    async fn delete(&self, id: &EntityId) -> Result<(), RemoteError>;
}

// ----------------------------------------------------------------------------
// Pending Sync Outbox
// ----------------------------------------------------------------------------

/// Record of a create that only reached the local store. The correlation id
/// is the synthesized local id, so a host-driven replay can reconcile the
/// record idempotently once connectivity returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSync {
    pub correlation_id: EntityId,
    pub queued_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Syncing Repository
// ----------------------------------------------------------------------------

/// Composes one local and one remote store under the local-first policy
pub struct SyncingRepository<E: Entity, T: TimeSource> {
    local: Arc<dyn LocalStore<E>>,
    remote: Arc<dyn RemoteStore<E>>,
    time: T,
    outbox: RwLock<Vec<PendingSync>>,
}

impl<E: Entity, T: TimeSource> SyncingRepository<E, T> {
    pub fn new(local: Arc<dyn LocalStore<E>>, remote: Arc<dyn RemoteStore<E>>, time: T) -> Self {
        Self {
            local,
            remote,
            time,
            outbox: RwLock::new(Vec::new()),
        }
    }

    /// List everything from the local store
    pub async fn get_all(&self) -> Vec<E> {
        self.local.list().await
    }

    /// List after a best-effort remote refresh. A refresh failure is logged
    /// and swallowed; the stale local snapshot is still returned.
    pub async fn get_all_with_refresh(&self) -> Vec<E> {
        if let Err(err) = self.refresh().await {
            warn!(error = %err, "remote refresh failed, serving local snapshot");
        }
        self.local.list().await
    }

    /// Fetch one entity: local first, then a best-effort remote lookup on a
    /// local miss (the hit is mirrored into the local store). A remote
    /// failure on a miss yields `None` rather than an error.
    pub async fn get(&self, id: &EntityId) -> Option<E> {
        if let Some(entity) = self.local.get(id).await {
            return Some(entity);
        }
        match self.remote.get(id).await {
            Ok(Some(entity)) => {
                self.local.put(entity.clone()).await;
                Some(entity)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(id = %id, error = %err, "remote lookup failed on local miss");
                None
            }
        }
    }

    /// Replace local contents with the remote listing. Unlike reads, the
    /// caller of an explicit refresh sees the failure.
    pub async fn refresh(&self) -> Result<usize, RemoteError> {
        let entities = self.remote.list().await?;
        self.local.clear().await;
        let count = entities.len();
        for entity in entities {
            self.local.put(entity).await;
        }
        Ok(count)
    }

    /// Create remote-first; on success the remote-assigned identity is
    /// mirrored locally. On remote failure the entity is created locally
    /// under a synthesized id and queued in the pending-sync outbox.
    pub async fn create(&self, entity: E) -> E {
        match self.remote.create(entity.clone()).await {
            Ok(created) => {
                self.local.put(created.clone()).await;
                created
            }
            Err(err) => {
                let now = self.time.now();
                warn!(error = %err, "remote create failed, falling back to local");

                let mut local_entity = entity;
                let local_id = EntityId::synthesize(now);
                local_entity.set_id(local_id.clone());
                local_entity.touch(now);
                self.local.put(local_entity.clone()).await;

                self.outbox.write().await.push(PendingSync {
                    correlation_id: local_id,
                    queued_at: now,
                });
                local_entity
            }
        }
    }

    /// Update remote-first; on success the authoritative remote result is
    /// applied locally. On remote failure the update lands on the local
    /// copy with a fresh modification stamp.
    pub async fn update(&self, id: &EntityId, entity: E) -> E {
        match self.remote.update(id, entity.clone()).await {
            Ok(updated) => {
                self.local.put(updated.clone()).await;
                updated
            }
            Err(err) => {
                warn!(id = %id, error = %err, "remote update failed, applying locally");
                let mut local_entity = entity;
                local_entity.set_id(id.clone());
                local_entity.touch(self.time.now());
                self.local.put(local_entity.clone()).await;
                local_entity
            }
        }
    }

    /// Delete remote then local. Local deletion is never blocked by remote
    /// unavailability; returns whether a local record was removed.
    pub async fn delete(&self, id: &EntityId) -> bool {
        if let Err(err) = self.remote.delete(id).await {
            warn!(id = %id, error = %err, "remote delete failed, deleting locally anyway");
        }
        self.local.remove(id).await
    }

    /// Local-only creates awaiting reconciliation
    pub async fn pending_sync(&self) -> Vec<PendingSync> {
        self.outbox.read().await.clone()
    }
}

// ----------------------------------------------------------------------------
// In-Memory Local Store
// ----------------------------------------------------------------------------

/// In-memory [`LocalStore`] implementation
#[derive(Default)]
pub struct MemoryStore<E> {
    entities: RwLock<BTreeMap<EntityId, E>>,
}

impl<E> MemoryStore<E> {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl<E: Entity> LocalStore<E> for MemoryStore<E> {
    async fn list(&self) -> Vec<E> {
        self.entities.read().await.values().cloned().collect()
    }

    async fn get(&self, id: &EntityId) -> Option<E> {
        self.entities.read().await.get(id).cloned()
    }

    async fn put(&self, entity: E) {
        self.entities.write().await.insert(entity.id(), entity);
    }

    async fn remove(&self, id: &EntityId) -> bool {
        self.entities.write().await.remove(id).is_some()
    }

    async fn clear(&self) {
        self.entities.write().await.clear();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
