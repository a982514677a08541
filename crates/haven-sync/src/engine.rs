//! # Config Sync Engine
//!
//! Keeps the local configuration cache in step with the cloud through full
//! snapshots, delta polls and pushed batches.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ConfigSyncEngine                                  │
//! │                                                                         │
//! │   sync_full()          sync_delta()            apply_push(payload)     │
//! │       │                    │                          │                 │
//! │       │  GET config/full   │  GET config/changes      │ parse batch     │
//! │       │                    │      ?since=<version>    │                 │
//! │       ▼                    ▼                          ▼                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            version lock (one writer at a time)                  │   │
//! │  │                                                                 │   │
//! │  │  snapshot: upsert every entity, write every scalar              │   │
//! │  │  batch:    stale? ──► no-op                                     │   │
//! │  │            apply changes in order ──► upsert / soft delete      │   │
//! │  │                                                                 │   │
//! │  │  save_version(new) ──► current = new     (only after all writes)│   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │   get_entity / list_entities / get_scalar ──► store (no lock, any tier)│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Semantics
//! A failed write aborts the call with the version untouched. Writes already
//! made stay in place; every write is an idempotent upsert or soft delete, so
//! the next delta or push re-applies the same batch safely.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use haven_core::{
    entity_id_of, parse_change_batch, ChangeAction, ChangeBatch, ConfigChange, ConfigSnapshot,
    ConfigVersion, StoredEntity, SyncSchema,
};

use crate::cloud::GuardedCloud;
use crate::config::CloudSettings;
use crate::error::SyncResult;
use crate::store::ConfigStore;

// =============================================================================
// Paths and Outcomes
// =============================================================================

/// Cloud endpoints and push topic used by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPaths {
    pub full: String,
    pub delta: String,
    pub topic: String,
}

impl Default for SyncPaths {
    fn default() -> Self {
        SyncPaths::from(&CloudSettings::default())
    }
}

impl From<&CloudSettings> for SyncPaths {
    fn from(settings: &CloudSettings) -> Self {
        SyncPaths {
            full: settings.full_sync_path.clone(),
            delta: settings.delta_path.clone(),
            topic: settings.push_topic.clone(),
        }
    }
}

/// Why a sync call did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The cloud is not connected.
    Disconnected,
}

/// Result of a sync call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Nothing was fetched or written.
    Skipped { reason: SkipReason },

    /// The batch was empty or stale.
    UpToDate { version: ConfigVersion },

    /// Writes were made and the version advanced.
    Applied {
        from: ConfigVersion,
        to: ConfigVersion,
        applied: usize,
        skipped: usize,
    },
}

impl SyncOutcome {
    /// Returns true if the cache changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied { .. })
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Sync engine for one local cache.
pub struct ConfigSyncEngine {
    cloud: GuardedCloud,
    store: Arc<dyn ConfigStore>,
    schema: SyncSchema,
    paths: SyncPaths,

    /// Serializes every write path. Holds the authoritative version.
    version: Mutex<ConfigVersion>,

    /// Last committed version, readable without the lock.
    published: AtomicI64,
}

impl ConfigSyncEngine {
    /// Creates an engine, resuming from the version persisted in `store`.
    pub async fn open(
        cloud: GuardedCloud,
        store: Arc<dyn ConfigStore>,
        schema: SyncSchema,
    ) -> SyncResult<Self> {
        let version = store.load_version().await?;
        info!(version = version.value(), "Config sync engine opened");

        Ok(ConfigSyncEngine {
            cloud,
            store,
            schema,
            paths: SyncPaths::default(),
            version: Mutex::new(version),
            published: AtomicI64::new(version.value()),
        })
    }

    /// Overrides the endpoints and topic.
    pub fn with_paths(mut self, paths: SyncPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Last committed version.
    pub fn current_version(&self) -> ConfigVersion {
        ConfigVersion::new(self.published.load(Ordering::SeqCst))
    }

    pub fn paths(&self) -> &SyncPaths {
        &self.paths
    }

    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    pub fn cloud(&self) -> &GuardedCloud {
        &self.cloud
    }

    // =========================================================================
    // Write Paths
    // =========================================================================

    /// Replaces the cache contents with a fresh cloud snapshot.
    ///
    /// The snapshot's version is adopted even if it is lower than the
    /// current one. Does nothing while disconnected.
    pub async fn sync_full(&self) -> SyncResult<SyncOutcome> {
        let mut current = self.version.lock().await;

        if !self.cloud.is_connected().await {
            debug!("Cloud disconnected, full sync skipped");
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::Disconnected,
            });
        }

        let response = self.cloud.get(&self.paths.full, &[]).await?;
        let snapshot = ConfigSnapshot::from_response(&response, &self.schema)?;

        let from = *current;
        let (applied, skipped) = self.write_snapshot(&snapshot).await?;
        self.commit(&mut current, snapshot.version).await?;

        info!(
            from = from.value(),
            to = snapshot.version.value(),
            entities = applied,
            skipped,
            "Full sync complete"
        );

        Ok(SyncOutcome::Applied {
            from,
            to: snapshot.version,
            applied,
            skipped,
        })
    }

    /// Fetches and applies the changes after the current version.
    ///
    /// Does nothing while disconnected.
    pub async fn sync_delta(&self) -> SyncResult<SyncOutcome> {
        let mut current = self.version.lock().await;

        if !self.cloud.is_connected().await {
            debug!("Cloud disconnected, delta sync skipped");
            return Ok(SyncOutcome::Skipped {
                reason: SkipReason::Disconnected,
            });
        }

        let since = [("since", current.value().to_string())];
        let response = self.cloud.get(&self.paths.delta, &since).await?;
        let batch = parse_change_batch(&response)?;

        self.apply_batch_locked(&mut current, batch).await
    }

    /// Applies a pushed `{version, changes}` payload.
    pub async fn apply_push(&self, payload: &Value) -> SyncResult<SyncOutcome> {
        let batch = parse_change_batch(payload)?;
        let mut current = self.version.lock().await;
        self.apply_batch_locked(&mut current, batch).await
    }

    /// Applies an already-parsed batch through the serialized path.
    pub async fn apply_batch(&self, batch: ChangeBatch) -> SyncResult<SyncOutcome> {
        let mut current = self.version.lock().await;
        self.apply_batch_locked(&mut current, batch).await
    }

    /// Subscribes to the push topic.
    pub async fn subscribe_push(&self) -> SyncResult<mpsc::Receiver<Value>> {
        self.cloud.subscribe(&self.paths.topic).await
    }

    // =========================================================================
    // Read Accessors
    // =========================================================================

    pub async fn get_entity(&self, entity_type: &str, id: &str) -> SyncResult<Option<StoredEntity>> {
        self.store.get(entity_type, id).await
    }

    pub async fn list_entities(&self, entity_type: &str) -> SyncResult<Vec<StoredEntity>> {
        self.store.list(entity_type).await
    }

    pub async fn get_scalar(&self, key: &str) -> SyncResult<Option<Value>> {
        self.store.get_scalar(key).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn write_snapshot(&self, snapshot: &ConfigSnapshot) -> SyncResult<(usize, usize)> {
        let mut applied = 0;
        let mut skipped = 0;

        for (entity_type, entities) in &snapshot.collections {
            for entity in entities {
                let Some(id) = entity_id_of(entity) else {
                    warn!(entity_type = %entity_type, "Snapshot entity without id skipped");
                    skipped += 1;
                    continue;
                };
                self.store.upsert(entity_type, &id, entity.clone()).await?;
                applied += 1;
            }
        }

        for (key, value) in &snapshot.scalar_config {
            self.store.set_scalar(key, value.clone()).await?;
        }

        Ok((applied, skipped))
    }

    async fn apply_batch_locked(
        &self,
        current: &mut ConfigVersion,
        batch: ChangeBatch,
    ) -> SyncResult<SyncOutcome> {
        if batch.is_empty() {
            return Ok(SyncOutcome::UpToDate { version: *current });
        }

        if !batch.version.supersedes(*current) {
            debug!(
                batch = batch.version.value(),
                current = current.value(),
                "Stale batch ignored"
            );
            return Ok(SyncOutcome::UpToDate { version: *current });
        }

        let from = *current;
        let mut applied = 0;
        let mut skipped = 0;

        for change in &batch.changes {
            if self.apply_change(change).await? {
                applied += 1;
            } else {
                skipped += 1;
            }
        }

        self.commit(current, batch.version).await?;

        info!(
            from = from.value(),
            to = batch.version.value(),
            applied,
            skipped,
            "Change batch applied"
        );

        Ok(SyncOutcome::Applied {
            from,
            to: batch.version,
            applied,
            skipped,
        })
    }

    /// Applies one change. Returns false when the change was skipped.
    async fn apply_change(&self, change: &ConfigChange) -> SyncResult<bool> {
        if !self.schema.knows_entity_type(&change.entity_type) {
            warn!(
                entity_type = %change.entity_type,
                entity_id = %change.entity_id,
                "Unknown entity type, change skipped"
            );
            return Ok(false);
        }

        match change.action {
            ChangeAction::Delete => {
                let found = self
                    .store
                    .soft_delete(&change.entity_type, &change.entity_id)
                    .await?;
                if !found {
                    debug!(
                        entity_type = %change.entity_type,
                        entity_id = %change.entity_id,
                        "Delete of unknown entity ignored"
                    );
                }
            }
            ChangeAction::Create | ChangeAction::Update => {
                let Some(data) = &change.data else {
                    warn!(
                        entity_type = %change.entity_type,
                        entity_id = %change.entity_id,
                        action = %change.action,
                        "Change without data skipped"
                    );
                    return Ok(false);
                };
                self.store
                    .upsert(&change.entity_type, &change.entity_id, data.clone())
                    .await?;
            }
        }

        debug!(
            entity_type = %change.entity_type,
            entity_id = %change.entity_id,
            action = %change.action,
            "Change applied"
        );
        Ok(true)
    }

    async fn commit(&self, current: &mut ConfigVersion, version: ConfigVersion) -> SyncResult<()> {
        self.store.save_version(version).await?;
        *current = version;
        self.published.store(version.value(), Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerRegistry;
    use crate::error::SyncError;
    use crate::retry::RetryPolicy;
    use crate::store::MemoryStore;
    use crate::http::HttpCloudConnection;
    use crate::testing::{closed_port, serve_json, FakeCloud};
    use async_trait::async_trait;
    use haven_db::{Database, DbConfig};
    use serde_json::json;
    use std::time::Duration;

    // =========================================================================
    // Fakes
    // =========================================================================

    /// Memory store whose upsert fails for one id.
    struct FailingStore {
        inner: MemoryStore,
        fail_id: String,
    }

    #[async_trait]
    impl ConfigStore for FailingStore {
        async fn upsert(&self, entity_type: &str, id: &str, data: Value) -> SyncResult<()> {
            if id == self.fail_id {
                return Err(SyncError::Store("disk full".into()));
            }
            self.inner.upsert(entity_type, id, data).await
        }
        async fn soft_delete(&self, entity_type: &str, id: &str) -> SyncResult<bool> {
            self.inner.soft_delete(entity_type, id).await
        }
        async fn get(&self, entity_type: &str, id: &str) -> SyncResult<Option<StoredEntity>> {
            self.inner.get(entity_type, id).await
        }
        async fn list(&self, entity_type: &str) -> SyncResult<Vec<StoredEntity>> {
            self.inner.list(entity_type).await
        }
        async fn set_scalar(&self, key: &str, value: Value) -> SyncResult<()> {
            self.inner.set_scalar(key, value).await
        }
        async fn get_scalar(&self, key: &str) -> SyncResult<Option<Value>> {
            self.inner.get_scalar(key).await
        }
        async fn load_version(&self) -> SyncResult<ConfigVersion> {
            self.inner.load_version().await
        }
        async fn save_version(&self, version: ConfigVersion) -> SyncResult<()> {
            self.inner.save_version(version).await
        }
    }

    async fn engine_with(cloud: Arc<FakeCloud>, store: Arc<dyn ConfigStore>) -> ConfigSyncEngine {
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1), 0.0);
        let guarded = GuardedCloud::new(cloud, Arc::new(BreakerRegistry::default()), policy);
        ConfigSyncEngine::open(guarded, store, SyncSchema::default())
            .await
            .unwrap()
    }

    async fn engine(cloud: Arc<FakeCloud>) -> ConfigSyncEngine {
        engine_with(cloud, Arc::new(MemoryStore::new())).await
    }

    fn delta(version: i64, changes: Value) -> Value {
        json!({"version": version, "changes": changes})
    }

    // =========================================================================
    // Full Sync
    // =========================================================================

    #[tokio::test]
    async fn test_full_sync_skipped_while_disconnected() {
        let cloud = FakeCloud::new();
        cloud.set_connected(false);
        let engine = engine(cloud.clone()).await;

        let outcome = engine.sync_full().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Skipped {
                reason: SkipReason::Disconnected
            }
        );
        assert!(cloud.calls().is_empty());

        assert!(matches!(
            engine.sync_delta().await.unwrap(),
            SyncOutcome::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_full_sync_writes_entities_and_scalars() {
        let cloud = FakeCloud::new();
        cloud.script(
            "config/full",
            Ok(json!({
                "version": 5,
                "menuItems": [{"id": "a", "name": "Latte"}, {"id": 7, "name": "Mocha"}, {"name": "no id"}],
                "categories": [{"id": "drinks"}],
                "storeSettings": {"currency": "USD"},
                "futureCollection": [{"id": "x"}]
            })),
        );
        let engine = engine(cloud).await;

        let outcome = engine.sync_full().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                from: ConfigVersion::ZERO,
                to: ConfigVersion::new(5),
                applied: 3,
                skipped: 1
            }
        );

        assert_eq!(engine.list_entities("menuItem").await.unwrap().len(), 2);
        assert!(engine.get_entity("menuItem", "7").await.unwrap().is_some());
        assert!(engine.get_entity("category", "drinks").await.unwrap().is_some());
        assert_eq!(
            engine.get_scalar("storeSettings").await.unwrap(),
            Some(json!({"currency": "USD"}))
        );
        assert_eq!(engine.current_version(), ConfigVersion::new(5));
    }

    #[tokio::test]
    async fn test_full_sync_adopts_lower_version() {
        let cloud = FakeCloud::new();
        cloud.script("config/full", Ok(json!({"version": 9})));
        cloud.script("config/full", Ok(json!({"version": 4})));
        let engine = engine(cloud).await;

        engine.sync_full().await.unwrap();
        engine.sync_full().await.unwrap();
        assert_eq!(engine.current_version(), ConfigVersion::new(4));
    }

    #[tokio::test]
    async fn test_full_sync_failure_leaves_version() {
        let cloud = FakeCloud::new();
        cloud.script("config/full", Ok(json!({"version": 3, "menuItems": [{"id": "boom"}]})));
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail_id: "boom".into(),
        });
        let engine = engine_with(cloud, store).await;

        assert!(engine.sync_full().await.is_err());
        assert_eq!(engine.current_version(), ConfigVersion::ZERO);
    }

    // =========================================================================
    // Delta Sync
    // =========================================================================

    #[tokio::test]
    async fn test_full_then_delete_delta() {
        let cloud = FakeCloud::new();
        cloud.script(
            "config/full",
            Ok(json!({"version": 5, "menuItems": [{"id": "a", "active": true}]})),
        );
        cloud.script(
            "config/changes",
            Ok(delta(
                6,
                json!([{"entityType": "menuItem", "entityId": "a", "action": "delete"}]),
            )),
        );
        let engine = engine(cloud).await;

        engine.sync_full().await.unwrap();
        engine.sync_delta().await.unwrap();

        let a = engine.get_entity("menuItem", "a").await.unwrap().unwrap();
        assert!(!a.active);
        assert_eq!(engine.current_version(), ConfigVersion::new(6));
    }

    #[tokio::test]
    async fn test_delta_queries_since_current_version() {
        let cloud = FakeCloud::new();
        cloud.script("config/full", Ok(json!({"version": 12})));
        cloud.script("config/changes", Ok(delta(12, json!([]))));
        let engine = engine(cloud.clone()).await;

        engine.sync_full().await.unwrap();
        let outcome = engine.sync_delta().await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::UpToDate {
                version: ConfigVersion::new(12)
            }
        );
        let calls = cloud.calls();
        assert_eq!(calls[1].0, "config/changes");
        assert_eq!(calls[1].1, vec![("since".to_string(), "12".to_string())]);
    }

    #[tokio::test]
    async fn test_stale_batch_is_ignored() {
        let cloud = FakeCloud::new();
        cloud.script("config/full", Ok(json!({"version": 5})));
        cloud.script(
            "config/changes",
            Ok(delta(
                5,
                json!([{"entityType": "menuItem", "entityId": "x", "action": "create", "data": {"id": "x"}}]),
            )),
        );
        let engine = engine(cloud).await;

        engine.sync_full().await.unwrap();
        let outcome = engine.sync_delta().await.unwrap();

        assert!(!outcome.is_applied());
        assert!(engine.get_entity("menuItem", "x").await.unwrap().is_none());
        assert_eq!(engine.current_version(), ConfigVersion::new(5));
    }

    #[tokio::test]
    async fn test_reapplying_batch_is_idempotent() {
        let cloud = FakeCloud::new();
        let engine = engine(cloud).await;
        let batch = ChangeBatch::new(
            2,
            vec![
                ConfigChange::upsert("menuItem", "a", ChangeAction::Create, json!({"id": "a", "price": 1})),
                ConfigChange::delete("menuItem", "b"),
            ],
        );

        engine.apply_batch(batch.clone()).await.unwrap();
        let once = engine.list_entities("menuItem").await.unwrap();

        // A fresh version lets the same changes through a second time.
        let again = ChangeBatch::new(3, batch.changes);
        engine.apply_batch(again).await.unwrap();
        assert_eq!(engine.list_entities("menuItem").await.unwrap(), once);
    }

    #[tokio::test]
    async fn test_create_then_update_in_one_batch() {
        let engine = engine(FakeCloud::new()).await;
        engine
            .apply_batch(ChangeBatch::new(
                1,
                vec![
                    ConfigChange::upsert("menuItem", "1", ChangeAction::Create, json!({"id": "1", "field": "A"})),
                    ConfigChange::upsert("menuItem", "1", ChangeAction::Update, json!({"id": "1", "field": "X"})),
                ],
            ))
            .await
            .unwrap();

        let item = engine.get_entity("menuItem", "1").await.unwrap().unwrap();
        assert_eq!(item.data["field"], "X");
    }

    #[tokio::test]
    async fn test_update_before_create_keeps_entity() {
        let engine = engine(FakeCloud::new()).await;
        let outcome = engine
            .apply_batch(ChangeBatch::new(
                1,
                vec![
                    ConfigChange::upsert("menuItem", "1", ChangeAction::Update, json!({"id": "1", "field": "X"})),
                    ConfigChange::upsert("menuItem", "1", ChangeAction::Create, json!({"id": "1", "field": "A"})),
                ],
            ))
            .await
            .unwrap();

        assert!(outcome.is_applied());
        let item = engine.get_entity("menuItem", "1").await.unwrap().unwrap();
        assert_eq!(item.data["field"], "A");
    }

    #[tokio::test]
    async fn test_unknown_entity_type_is_skipped() {
        let engine = engine(FakeCloud::new()).await;
        let outcome = engine
            .apply_batch(ChangeBatch::new(
                4,
                vec![
                    ConfigChange::upsert("loyaltyTier", "gold", ChangeAction::Create, json!({"id": "gold"})),
                    ConfigChange::upsert("menuItem", "a", ChangeAction::Create, json!({"id": "a"})),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                from: ConfigVersion::ZERO,
                to: ConfigVersion::new(4),
                applied: 1,
                skipped: 1
            }
        );
        assert!(engine.get_entity("loyaltyTier", "gold").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_without_data_is_skipped() {
        let engine = engine(FakeCloud::new()).await;
        let change = ConfigChange {
            entity_type: "menuItem".into(),
            entity_id: "a".into(),
            action: ChangeAction::Update,
            data: None,
        };

        let outcome = engine.apply_batch(ChangeBatch::new(1, vec![change])).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Applied { applied: 0, skipped: 1, .. }));
        assert!(engine.get_entity("menuItem", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mid_batch_failure_keeps_version() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail_id: "boom".into(),
        });
        let engine = engine_with(FakeCloud::new(), store).await;

        let result = engine
            .apply_batch(ChangeBatch::new(
                2,
                vec![
                    ConfigChange::upsert("menuItem", "a", ChangeAction::Create, json!({"id": "a"})),
                    ConfigChange::upsert("menuItem", "boom", ChangeAction::Create, json!({"id": "boom"})),
                    ConfigChange::upsert("menuItem", "c", ChangeAction::Create, json!({"id": "c"})),
                ],
            ))
            .await;

        assert!(matches!(result, Err(SyncError::Store(_))));
        assert_eq!(engine.current_version(), ConfigVersion::ZERO);
        assert!(engine.get_entity("menuItem", "a").await.unwrap().is_some());
        assert!(engine.get_entity("menuItem", "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let cloud = FakeCloud::new();
        cloud.script("config/changes", Err(SyncError::ConnectionFailed("reset".into())));
        let engine = engine(cloud).await;

        let err = engine.sync_delta().await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionFailed(_)));
        assert_eq!(engine.current_version(), ConfigVersion::ZERO);
    }

    // =========================================================================
    // Push
    // =========================================================================

    #[tokio::test]
    async fn test_push_applies_batch() {
        let engine = engine(FakeCloud::new()).await;
        let outcome = engine
            .apply_push(&delta(
                3,
                json!([{"entityType": "discount", "entityId": "happy-hour", "action": "create", "data": {"id": "happy-hour", "pct": 10}}]),
            ))
            .await
            .unwrap();

        assert!(outcome.is_applied());
        assert_eq!(engine.current_version(), ConfigVersion::new(3));
    }

    #[tokio::test]
    async fn test_malformed_push_is_validation_error() {
        let engine = engine(FakeCloud::new()).await;
        let err = engine.apply_push(&json!({"changes": []})).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_push_and_delta_never_regress() {
        let cloud = FakeCloud::new();
        cloud.script(
            "config/changes",
            Ok(delta(
                8,
                json!([{"entityType": "menuItem", "entityId": "p", "action": "create", "data": {"id": "p", "v": 8}}]),
            )),
        );
        let engine = Arc::new(engine(cloud).await);

        let push = delta(
            7,
            json!([{"entityType": "menuItem", "entityId": "p", "action": "create", "data": {"id": "p", "v": 7}}]),
        );
        let (a, b) = tokio::join!(engine.sync_delta(), engine.apply_push(&push));
        a.unwrap();
        b.unwrap();

        assert_eq!(engine.current_version(), ConfigVersion::new(8));
        let p = engine.get_entity("menuItem", "p").await.unwrap().unwrap();
        assert_eq!(p.data["v"], 8);
    }

    // =========================================================================
    // Outages and Cancellation
    // =========================================================================

    #[tokio::test]
    async fn test_delta_resumes_after_http_outage() {
        let port = closed_port().await;
        let http = HttpCloudConnection::new(&CloudSettings {
            base_url: format!("http://127.0.0.1:{}/", port),
            request_timeout_secs: 2,
            connect_timeout_secs: 1,
            ..Default::default()
        })
        .unwrap();
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1), 0.0);
        let guarded = GuardedCloud::new(Arc::new(http), Arc::new(BreakerRegistry::default()), policy);
        let engine = ConfigSyncEngine::open(guarded, Arc::new(MemoryStore::new()), SyncSchema::default())
            .await
            .unwrap();

        assert!(engine.sync_delta().await.unwrap_err().is_retryable());
        assert!(matches!(
            engine.sync_delta().await.unwrap(),
            SyncOutcome::Skipped { .. }
        ));

        let server = serve_json(
            port,
            r#"{"version": 4, "changes": [{"entityType": "menuItem", "entityId": "a", "action": "create", "data": {"id": "a"}}]}"#,
        )
        .await;

        let outcome = engine.sync_delta().await.unwrap();
        assert!(outcome.is_applied());
        assert_eq!(engine.current_version(), ConfigVersion::new(4));
        assert!(engine.get_entity("menuItem", "a").await.unwrap().is_some());

        server.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_during_backoff_keeps_version_and_releases_lock() {
        let cloud = FakeCloud::new();
        for _ in 0..3 {
            cloud.script("config/changes", Err(SyncError::ConnectionFailed("reset".into())));
        }
        let policy = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(10), 0.0);
        let guarded = GuardedCloud::new(cloud.clone(), Arc::new(BreakerRegistry::default()), policy);
        let engine = ConfigSyncEngine::open(guarded, Arc::new(MemoryStore::new()), SyncSchema::default())
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), engine.sync_delta()).await;
        assert!(result.is_err());
        assert_eq!(cloud.calls_to("config/changes"), 1);
        assert_eq!(engine.current_version(), ConfigVersion::ZERO);

        let push = delta(
            2,
            json!([{"entityType": "menuItem", "entityId": "b", "action": "create", "data": {"id": "b"}}]),
        );
        let outcome = tokio::time::timeout(Duration::from_secs(1), engine.apply_push(&push))
            .await
            .expect("version lock still held")
            .unwrap();
        assert!(outcome.is_applied());
        assert_eq!(engine.current_version(), ConfigVersion::new(2));
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[tokio::test]
    async fn test_sqlite_store_resumes_version() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cloud = FakeCloud::new();
        cloud.script("config/full", Ok(json!({"version": 5, "menuItems": [{"id": "a"}]})));
        cloud.script(
            "config/changes",
            Ok(delta(6, json!([{"entityType": "menuItem", "entityId": "a", "action": "delete"}]))),
        );

        let engine = engine_with(cloud.clone(), Arc::new(db.clone())).await;
        engine.sync_full().await.unwrap();
        engine.sync_delta().await.unwrap();

        let reopened = engine_with(cloud, Arc::new(db)).await;
        assert_eq!(reopened.current_version(), ConfigVersion::new(6));
        let a = reopened.get_entity("menuItem", "a").await.unwrap().unwrap();
        assert!(!a.active);
    }
}
