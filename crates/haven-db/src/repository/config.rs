//! # Configuration Cache Repository
//!
//! Persists synced configuration: entities, scalar blobs and the version.
//!
//! ## Table Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Local Configuration Cache                         │
//! │                                                                         │
//! │  config_entities                                                        │
//! │  ┌─────────────┬───────────┬──────────────────────┬────────┐           │
//! │  │ entity_type │ entity_id │ data (JSON text)     │ active │           │
//! │  ├─────────────┼───────────┼──────────────────────┼────────┤           │
//! │  │ menuItem    │ a         │ {"id":"a",...}       │ 1      │           │
//! │  │ menuItem    │ b         │ {"id":"b",...}       │ 0      │ ← deleted │
//! │  └─────────────┴───────────┴──────────────────────┴────────┘           │
//! │                                                                         │
//! │  config_scalars          sync_state (single row, id = 1)               │
//! │  ┌───────────────┬─────┐ ┌────┬────────────────┐                       │
//! │  │ storeSettings │ {…} │ │ 1  │ config_version │                       │
//! │  └───────────────┴─────┘ └────┴────────────────┘                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deletes never remove rows. A deleted entity stays readable with
//! `active = 0` so historical references keep resolving.

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::DbResult;
use haven_core::{entity_id_of, ConfigSnapshot, ConfigVersion, StoredEntity};

/// Repository for the local configuration cache.
#[derive(Debug, Clone)]
pub struct ConfigRepository {
    pool: SqlitePool,
}

impl ConfigRepository {
    /// Creates a new ConfigRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ConfigRepository { pool }
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Inserts or replaces an entity, keyed by `(entity_type, id)`.
    ///
    /// Applying the same entity twice leaves one row with the latest payload.
    pub async fn upsert_entity(&self, entity: &StoredEntity) -> DbResult<()> {
        let data = serde_json::to_string(&entity.data)?;
        let now = Utc::now();

        debug!(
            entity_type = %entity.entity_type,
            entity_id = %entity.id,
            "Upserting entity"
        );

        sqlx::query(
            r#"
            INSERT INTO config_entities (entity_type, entity_id, data, active, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                data = excluded.data,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entity.entity_type)
        .bind(&entity.id)
        .bind(data)
        .bind(entity.active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Soft deletes an entity.
    ///
    /// ## Returns
    /// `true` if the entity existed (it is now inactive), `false` if there was
    /// nothing to delete.
    pub async fn soft_delete(&self, entity_type: &str, id: &str) -> DbResult<bool> {
        let Some(mut entity) = self.get_entity(entity_type, id).await? else {
            debug!(entity_type, entity_id = id, "Delete for unknown entity ignored");
            return Ok(false);
        };

        entity.mark_inactive();
        self.upsert_entity(&entity).await?;

        Ok(true)
    }

    /// Gets an entity by type and id, active or not.
    pub async fn get_entity(&self, entity_type: &str, id: &str) -> DbResult<Option<StoredEntity>> {
        let row = sqlx::query(
            r#"
            SELECT entity_type, entity_id, data, active
            FROM config_entities
            WHERE entity_type = ?1 AND entity_id = ?2
            "#,
        )
        .bind(entity_type)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| entity_from_row(&r)).transpose()
    }

    /// Lists every entity of a type, inactive ones included, ordered by id.
    pub async fn list_entities(&self, entity_type: &str) -> DbResult<Vec<StoredEntity>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_type, entity_id, data, active
            FROM config_entities
            WHERE entity_type = ?1
            ORDER BY entity_id ASC
            "#,
        )
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entity_from_row).collect()
    }

    // =========================================================================
    // Scalars
    // =========================================================================

    /// Replaces a scalar config blob.
    pub async fn set_scalar(&self, key: &str, value: &Value) -> DbResult<()> {
        let encoded = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO config_scalars (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(encoded)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a scalar config blob.
    pub async fn get_scalar(&self, key: &str) -> DbResult<Option<Value>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM config_scalars WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Version
    // =========================================================================

    /// Loads the persisted config version, 0 if nothing was ever synced.
    pub async fn get_version(&self) -> DbResult<ConfigVersion> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT config_version FROM sync_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(ConfigVersion::new(version.unwrap_or(0)))
    }

    /// Persists the config version.
    pub async fn set_version(&self, version: ConfigVersion) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (id, config_version, updated_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT (id) DO UPDATE SET
                config_version = excluded.config_version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(version.value())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(version = %version, "Config version persisted");
        Ok(())
    }

    // =========================================================================
    // Bulk Import
    // =========================================================================

    /// Writes a whole snapshot and its version in one transaction.
    ///
    /// Used for offline provisioning from an exported snapshot file. Entities
    /// without an id are skipped.
    ///
    /// ## Returns
    /// Number of entities written.
    pub async fn import_snapshot(&self, snapshot: &ConfigSnapshot) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut written = 0;

        for (entity_type, entities) in &snapshot.collections {
            for payload in entities {
                let Some(id) = entity_id_of(payload) else {
                    warn!(entity_type = %entity_type, "Snapshot entity without id skipped");
                    continue;
                };

                let entity = StoredEntity::from_payload(entity_type.as_str(), id, payload.clone());

                sqlx::query(
                    r#"
                    INSERT INTO config_entities (entity_type, entity_id, data, active, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                        data = excluded.data,
                        active = excluded.active,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&entity.entity_type)
                .bind(&entity.id)
                .bind(serde_json::to_string(&entity.data)?)
                .bind(entity.active)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                written += 1;
            }
        }

        for (key, value) in &snapshot.scalar_config {
            sqlx::query(
                r#"
                INSERT INTO config_scalars (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO sync_state (id, config_version, updated_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT (id) DO UPDATE SET
                config_version = excluded.config_version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(snapshot.version.value())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            entities = written,
            scalars = snapshot.scalar_config.len(),
            version = %snapshot.version,
            "Snapshot imported"
        );

        Ok(written)
    }
}

/// Maps a `config_entities` row back to a `StoredEntity`.
fn entity_from_row(row: &SqliteRow) -> DbResult<StoredEntity> {
    let data: String = row.try_get("data")?;

    Ok(StoredEntity {
        entity_type: row.try_get("entity_type")?,
        id: row.try_get("entity_id")?,
        data: serde_json::from_str(&data)?,
        active: row.try_get("active")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
