//! Sync queue of mutations waiting for connectivity.
//!
//! The queue is persisted in the cache store as one versioned JSON envelope
//! under `syncQueue`. Every change is a read-modify-write of that envelope,
//! serialized through an async mutex so overlapping tasks cannot drop items.
//!
//! When a queued create is acknowledged, the server id that replaced its
//! local id is remembered under `syncIdMap`. Operations enqueued later against
//! the local id are rewritten to the server id on the way in.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{DomainPayload, OperationId, PendingOperation, SyncAction};
use crate::store::CacheStore;

/// Key of the queue envelope in the cache store
pub const QUEUE_KEY: &str = "syncQueue";
/// Key of the local-to-server id map in the cache store
pub const ID_MAP_KEY: &str = "syncIdMap";
const QUEUE_SCHEMA_VERSION: u32 = 1;
// Oldest mappings are forgotten first.
const MAX_ID_MAPPINGS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IdMapping {
    local_id: String,
    server_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueEnvelope {
    schema_version: u32,
    operations: Vec<PendingOperation>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredQueue {
    Envelope(QueueEnvelope),
    // Plain ordered list written by older clients.
    Bare(Vec<PendingOperation>),
}

/// FIFO queue of pending remote mutations
#[derive(Clone)]
pub struct SyncQueue {
    store: CacheStore,
    write_lock: Arc<Mutex<()>>,
}

impl SyncQueue {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Append an operation; only touches local storage.
    pub async fn enqueue(
        &self,
        action: SyncAction,
        endpoint: impl Into<String>,
        payload: Option<DomainPayload>,
    ) -> Result<OperationId> {
        self.push(action, endpoint.into(), payload, None).await
    }

    /// Append a create whose optimistic result lives under `local_id`.
    pub async fn enqueue_local_create(
        &self,
        endpoint: impl Into<String>,
        payload: DomainPayload,
        local_id: impl Into<String>,
    ) -> Result<OperationId> {
        self.push(
            SyncAction::Create,
            endpoint.into(),
            Some(payload),
            Some(local_id.into()),
        )
        .await
    }

    /// All pending operations in enqueue order
    pub async fn list(&self) -> Vec<PendingOperation> {
        self.load().await
    }

    pub async fn len(&self) -> usize {
        self.load().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.load().await.is_empty()
    }

    /// Current persisted form of an operation, if it is still queued
    pub async fn get(&self, id: OperationId) -> Option<PendingOperation> {
        let _guard = self.write_lock.lock().await;
        self.load()
            .await
            .into_iter()
            .find(|operation| operation.id == id)
    }

    /// Server id that replaced a local id, once its create was acknowledged
    pub async fn resolve_id(&self, local_id: &str) -> Option<String> {
        self.load_id_map()
            .await
            .into_iter()
            .find(|mapping| mapping.local_id == local_id)
            .map(|mapping| mapping.server_id)
    }

    /// Remove one operation; returns whether it was present
    pub async fn remove(&self, id: OperationId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut operations = self.load().await;
        let before = operations.len();
        operations.retain(|operation| operation.id != id);
        if operations.len() == before {
            return Ok(false);
        }
        self.save(operations).await?;
        Ok(true)
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(QUEUE_KEY).await
    }

    /// Record the server id that replaced a local id and point queued
    /// operations at it
    pub async fn retarget(&self, local_id: &str, server_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let mut mappings = self.load_id_map().await;
        mappings.retain(|mapping| mapping.local_id != local_id);
        mappings.push(IdMapping {
            local_id: local_id.to_string(),
            server_id: server_id.to_string(),
        });
        let overflow = mappings.len().saturating_sub(MAX_ID_MAPPINGS);
        mappings.drain(..overflow);
        self.store.put(ID_MAP_KEY, &mappings).await?;

        let mut operations = self.load().await;
        let mut changed = 0;
        for operation in &mut operations {
            if operation.retarget(local_id, server_id) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.save(operations).await?;
            tracing::debug!(
                "Retargeted {} queued operations from {} to {}",
                changed,
                local_id,
                server_id
            );
        }
        Ok(changed)
    }

    /// Drop every queued operation that targets an entity
    pub async fn discard_for_entity(&self, entity_id: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut operations = self.load().await;
        let before = operations.len();
        operations.retain(|operation| !operation.targets(entity_id));
        let discarded = before - operations.len();
        if discarded > 0 {
            self.save(operations).await?;
        }
        Ok(discarded)
    }

    async fn push(
        &self,
        action: SyncAction,
        endpoint: String,
        payload: Option<DomainPayload>,
        local_id: Option<String>,
    ) -> Result<OperationId> {
        let _guard = self.write_lock.lock().await;
        let mut operations = self.load().await;
        let last = operations.iter().map(|operation| operation.id).max();
        let id = OperationId::next_after(last);

        let mut operation = PendingOperation {
            id,
            action,
            endpoint,
            payload,
            local_id,
            enqueued_at: Utc::now(),
        };
        for mapping in self.load_id_map().await {
            operation.retarget(&mapping.local_id, &mapping.server_id);
        }
        operations.push(operation);
        let depth = operations.len();
        self.save(operations).await?;

        tracing::info!("Queued {} operation {} ({} pending)", action, id, depth);
        Ok(id)
    }

    async fn load(&self) -> Vec<PendingOperation> {
        match self.store.get::<StoredQueue>(QUEUE_KEY).await {
            Some(StoredQueue::Envelope(envelope))
                if envelope.schema_version == QUEUE_SCHEMA_VERSION =>
            {
                envelope.operations
            }
            Some(StoredQueue::Envelope(envelope)) => {
                tracing::warn!(
                    "Ignoring sync queue with unsupported schema_version {}",
                    envelope.schema_version
                );
                Vec::new()
            }
            Some(StoredQueue::Bare(operations)) => operations,
            None => Vec::new(),
        }
    }

    async fn load_id_map(&self) -> Vec<IdMapping> {
        self.store.get(ID_MAP_KEY).await.unwrap_or_default()
    }

    async fn save(&self, operations: Vec<PendingOperation>) -> Result<()> {
        if operations.is_empty() {
            return self.store.remove(QUEUE_KEY).await;
        }
        let envelope = QueueEnvelope {
            schema_version: QUEUE_SCHEMA_VERSION,
            operations,
        };
        self.store.put(QUEUE_KEY, &envelope).await
    }
}
