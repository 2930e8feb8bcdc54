//! Local replica of synced entities
//!
//! Entities the device has seen, keyed by `<entity-type>/<id>` and persisted
//! as one blob under [`REPLICA_KEY`]. Local mutations are applied
//! optimistically and flagged dirty until a full sync acknowledges them.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{EntityType, OperationKind, SyncEntity};
use crate::remote::{EntityChange, EntityRef};
use crate::storage::{KeyValueStore, StorageResult};

/// Store key of the persisted replica
pub const REPLICA_KEY: &str = "local_replica";

/// One cached entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaEntry {
    pub entity: SyncEntity,
    /// Kind of the last local change
    pub kind: OperationKind,
    pub modified_at: DateTime<Utc>,
    /// Tombstone of a local delete not yet acknowledged
    #[serde(default)]
    pub deleted: bool,
    /// Carries a local change the server has not acknowledged
    #[serde(default)]
    pub dirty: bool,
}

/// Result of merging a full-sync response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Server entities written into the replica
    pub applied: usize,
    /// Server deletions applied
    pub removed: usize,
    /// Server changes ignored because a local write is still outstanding
    pub skipped: usize,
}

fn replica_key(entity_type: EntityType, id: &str) -> String {
    format!("{}/{}", entity_type, id)
}

/// The replica
pub struct LocalReplica {
    entries: Mutex<BTreeMap<String, ReplicaEntry>>,
    store: Arc<dyn KeyValueStore>,
}

impl LocalReplica {
    /// Load the replica; an unreadable blob starts empty since the next full
    /// sync refills it from the server
    pub async fn load(store: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let entries = match store.get(REPLICA_KEY).await? {
            Some(blob) => serde_json::from_str(&blob).unwrap_or_else(|e| {
                warn!("Local replica is unreadable, starting empty: {}", e);
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };

        Ok(Self {
            entries: Mutex::new(entries),
            store,
        })
    }

    /// Apply a local mutation and flag it for the next full sync
    pub async fn apply_local(&self, kind: OperationKind, entity: &SyncEntity) {
        let mut entries = self.entries.lock().await;
        let key = replica_key(entity.entity_type(), entity.entity_id());

        // A create not yet acknowledged stays a create
        let kind = match entries.get(&key) {
            Some(prev) if prev.dirty && prev.kind == OperationKind::Create && kind == OperationKind::Update => {
                OperationKind::Create
            }
            _ => kind,
        };

        entries.insert(
            key,
            ReplicaEntry {
                entity: entity.clone(),
                kind,
                modified_at: Utc::now(),
                deleted: kind == OperationKind::Delete,
                dirty: true,
            },
        );
        self.persist(&entries).await;
    }

    /// Local changes not yet acknowledged by the server
    pub async fn dirty_changes(&self) -> Vec<EntityChange> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|entry| entry.dirty)
            .map(|entry| EntityChange {
                kind: entry.kind,
                entity: entry.entity.clone(),
                modified_at: entry.modified_at,
            })
            .collect()
    }

    /// Clear the dirty flag of changes the server accepted
    ///
    /// An entry modified again after the batch was built stays dirty.
    pub async fn acknowledge(&self, changes: &[EntityChange]) {
        if changes.is_empty() {
            return;
        }

        let mut entries = self.entries.lock().await;
        for change in changes {
            let key = replica_key(change.entity.entity_type(), change.entity.entity_id());
            let Some(entry) = entries.get_mut(&key) else {
                continue;
            };
            if entry.modified_at > change.modified_at {
                continue;
            }
            if entry.deleted {
                entries.remove(&key);
            } else {
                entry.dirty = false;
            }
        }
        self.persist(&entries).await;
    }

    /// Merge server-authoritative state
    ///
    /// The server wins, except for entities with an unacknowledged local
    /// change or with a queued operation still waiting for delivery.
    pub async fn merge_server(
        &self,
        entities: Vec<SyncEntity>,
        deleted: Vec<EntityRef>,
        protected: &HashSet<EntityRef>,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        if entities.is_empty() && deleted.is_empty() {
            return outcome;
        }

        let mut entries = self.entries.lock().await;
        let is_held = |entries: &BTreeMap<String, ReplicaEntry>, entity_type, id: &str| {
            let local_dirty = entries
                .get(&replica_key(entity_type, id))
                .is_some_and(|entry| entry.dirty);
            local_dirty
                || protected.contains(&EntityRef {
                    entity_type,
                    entity_id: id.to_string(),
                })
        };

        for entity in entities {
            let (entity_type, id) = (entity.entity_type(), entity.entity_id().to_string());
            if is_held(&*entries, entity_type, &id) {
                debug!("Keeping local {} {} over server copy", entity_type, id);
                outcome.skipped += 1;
                continue;
            }
            entries.insert(
                replica_key(entity_type, &id),
                ReplicaEntry {
                    modified_at: entity.updated_at(),
                    entity,
                    kind: OperationKind::Update,
                    deleted: false,
                    dirty: false,
                },
            );
            outcome.applied += 1;
        }

        for gone in deleted {
            if is_held(&*entries, gone.entity_type, &gone.entity_id) {
                outcome.skipped += 1;
                continue;
            }
            if entries
                .remove(&replica_key(gone.entity_type, &gone.entity_id))
                .is_some()
            {
                outcome.removed += 1;
            }
        }

        self.persist(&entries).await;
        outcome
    }

    /// A live (not deleted) entity
    pub async fn get(&self, entity_type: EntityType, id: &str) -> Option<SyncEntity> {
        let entries = self.entries.lock().await;
        entries
            .get(&replica_key(entity_type, id))
            .filter(|entry| !entry.deleted)
            .map(|entry| entry.entity.clone())
    }

    /// Live entities of one type
    pub async fn entities(&self, entity_type: EntityType) -> Vec<SyncEntity> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|entry| !entry.deleted && entry.entity.entity_type() == entity_type)
            .map(|entry| entry.entity.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn dirty_count(&self) -> usize {
        self.entries.lock().await.values().filter(|e| e.dirty).count()
    }

    async fn persist(&self, entries: &BTreeMap<String, ReplicaEntry>) {
        match serde_json::to_string(entries) {
            Ok(blob) => {
                if let Err(e) = self.store.set(REPLICA_KEY, blob).await {
                    warn!("Failed to save local replica: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize local replica: {}", e),
        }
    }
}
