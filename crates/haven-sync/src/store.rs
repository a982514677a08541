//! # Config Store
//!
//! The local configuration cache as the sync engine sees it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     ConfigStore implementations                         │
//! │                                                                         │
//! │  ┌─────────────────────────┐        ┌─────────────────────────────┐    │
//! │  │ MemoryStore             │        │ haven_db::Database          │    │
//! │  │ BTreeMap arena keyed by │        │ config_entities             │    │
//! │  │ (entity_type, id)       │        │ config_scalars, sync_state  │    │
//! │  │ tests, ephemeral nodes  │        │ production terminals        │    │
//! │  └─────────────────────────┘        └─────────────────────────────┘    │
//! │                                                                         │
//! │  Upserts overwrite. Soft deletes keep the row with active = false.     │
//! │  Reads never depend on connectivity.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use haven_core::{ConfigVersion, StoredEntity};
use haven_db::Database;

use crate::error::SyncResult;

/// Storage the sync engine writes through and readers read from.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Inserts or replaces an entity. Idempotent.
    async fn upsert(&self, entity_type: &str, id: &str, data: Value) -> SyncResult<()>;

    /// Marks an entity inactive. Returns false when the id is unknown.
    async fn soft_delete(&self, entity_type: &str, id: &str) -> SyncResult<bool>;

    async fn get(&self, entity_type: &str, id: &str) -> SyncResult<Option<StoredEntity>>;

    /// All entities of a type, inactive included, ordered by id.
    async fn list(&self, entity_type: &str) -> SyncResult<Vec<StoredEntity>>;

    async fn set_scalar(&self, key: &str, value: Value) -> SyncResult<()>;

    async fn get_scalar(&self, key: &str) -> SyncResult<Option<Value>>;

    /// Last persisted version, zero for a fresh cache.
    async fn load_version(&self) -> SyncResult<ConfigVersion>;

    async fn save_version(&self, version: ConfigVersion) -> SyncResult<()>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Volatile store backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<BTreeMap<(String, String), StoredEntity>>,
    scalars: RwLock<BTreeMap<String, Value>>,
    version: RwLock<ConfigVersion>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn upsert(&self, entity_type: &str, id: &str, data: Value) -> SyncResult<()> {
        let entity = StoredEntity::from_payload(entity_type, id, data);
        self.entities
            .write()
            .await
            .insert((entity_type.to_string(), id.to_string()), entity);
        Ok(())
    }

    async fn soft_delete(&self, entity_type: &str, id: &str) -> SyncResult<bool> {
        let mut entities = self.entities.write().await;
        match entities.get_mut(&(entity_type.to_string(), id.to_string())) {
            Some(entity) => {
                entity.mark_inactive();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, entity_type: &str, id: &str) -> SyncResult<Option<StoredEntity>> {
        Ok(self
            .entities
            .read()
            .await
            .get(&(entity_type.to_string(), id.to_string()))
            .cloned())
    }

    async fn list(&self, entity_type: &str) -> SyncResult<Vec<StoredEntity>> {
        Ok(self
            .entities
            .read()
            .await
            .values()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect())
    }

    async fn set_scalar(&self, key: &str, value: Value) -> SyncResult<()> {
        self.scalars.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_scalar(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.scalars.read().await.get(key).cloned())
    }

    async fn load_version(&self) -> SyncResult<ConfigVersion> {
        Ok(*self.version.read().await)
    }

    async fn save_version(&self, version: ConfigVersion) -> SyncResult<()> {
        *self.version.write().await = version;
        Ok(())
    }
}

// =============================================================================
// SQLite Store
// =============================================================================

#[async_trait]
impl ConfigStore for Database {
    async fn upsert(&self, entity_type: &str, id: &str, data: Value) -> SyncResult<()> {
        let entity = StoredEntity::from_payload(entity_type, id, data);
        self.config().upsert_entity(&entity).await?;
        Ok(())
    }

    async fn soft_delete(&self, entity_type: &str, id: &str) -> SyncResult<bool> {
        Ok(self.config().soft_delete(entity_type, id).await?)
    }

    async fn get(&self, entity_type: &str, id: &str) -> SyncResult<Option<StoredEntity>> {
        Ok(self.config().get_entity(entity_type, id).await?)
    }

    async fn list(&self, entity_type: &str) -> SyncResult<Vec<StoredEntity>> {
        Ok(self.config().list_entities(entity_type).await?)
    }

    async fn set_scalar(&self, key: &str, value: Value) -> SyncResult<()> {
        self.config().set_scalar(key, &value).await?;
        Ok(())
    }

    async fn get_scalar(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.config().get_scalar(key).await?)
    }

    async fn load_version(&self) -> SyncResult<ConfigVersion> {
        Ok(self.config().get_version().await?)
    }

    async fn save_version(&self, version: ConfigVersion) -> SyncResult<()> {
        self.config().set_version(version).await?;
        Ok(())
    }
}
