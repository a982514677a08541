//! # Domain Types
//!
//! Core types shared by the storage and sync layers.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ConnectivityTier │   │ReachabilityProbe│   │  ConfigVersion  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Green          │   │  cloud          │   │  i64, only      │       │
//! │  │  Yellow         │   │  service host   │   │  ever increases │       │
//! │  │  Orange         │   │  local agent    │   │  (except full   │       │
//! │  │  Red            │   │  observed_at    │   │   snapshot)     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ConfigChange   │   │  ChangeBatch    │   │  StoredEntity   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  entity_type    │   │  version        │   │  entity_type    │       │
//! │  │  entity_id      │   │  changes (in    │   │  id             │       │
//! │  │  action         │   │   order)        │   │  data           │       │
//! │  │  data?          │   │                 │   │  active         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::CoreError;

// =============================================================================
// Connectivity Tier
// =============================================================================

/// Which layer of the network topology is currently reachable.
///
/// ## Ordering
/// Variants are declared from worst to best so the derived `Ord` gives
/// `Green > Yellow > Orange > Red`.
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  GREEN   cloud reachable             full + delta sync, push           │
/// │  YELLOW  local service node only     serve from local cache            │
/// │  ORANGE  local device agents only    print agents still usable         │
/// │  RED     nothing reachable           fully offline                     │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityTier {
    /// Nothing reachable, fully local.
    Red,
    /// Only local device agents (print agents etc.) reachable.
    Orange,
    /// Cloud unreachable but the local service node is up.
    Yellow,
    /// Cloud reachable.
    Green,
}

impl ConnectivityTier {
    /// All tiers, best first.
    pub const ALL: [ConnectivityTier; 4] = [
        ConnectivityTier::Green,
        ConnectivityTier::Yellow,
        ConnectivityTier::Orange,
        ConnectivityTier::Red,
    ];

    /// Returns true if the cloud backend can be called.
    pub fn is_cloud_reachable(&self) -> bool {
        matches!(self, ConnectivityTier::Green)
    }

    /// Returns true if a full configuration sync may run in this tier.
    pub fn allows_full_sync(&self) -> bool {
        self.is_cloud_reachable()
    }

    /// Returns true if no remote component at all is reachable.
    pub fn is_offline(&self) -> bool {
        matches!(self, ConnectivityTier::Red)
    }

    /// Lowercase name used on the wire and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityTier::Green => "green",
            ConnectivityTier::Yellow => "yellow",
            ConnectivityTier::Orange => "orange",
            ConnectivityTier::Red => "red",
        }
    }
}

impl std::fmt::Display for ConnectivityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectivityTier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "green" => Ok(ConnectivityTier::Green),
            "yellow" => Ok(ConnectivityTier::Yellow),
            "orange" => Ok(ConnectivityTier::Orange),
            "red" => Ok(ConnectivityTier::Red),
            other => Err(CoreError::UnknownTier(other.to_string())),
        }
    }
}

// =============================================================================
// Reachability Probe
// =============================================================================

/// A point-in-time reachability snapshot produced by the prober.
///
/// Immutable once created; the tier is re-derived from each new probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReachabilityProbe {
    /// Cloud backend answered.
    pub cloud_reachable: bool,

    /// Local service node answered.
    pub service_host_reachable: bool,

    /// At least one local device agent answered.
    pub local_agent_available: bool,

    /// When the probe completed.
    #[serde(default = "Utc::now")]
    #[ts(as = "String")]
    pub observed_at: DateTime<Utc>,
}

impl ReachabilityProbe {
    /// Creates a probe stamped with the current time.
    pub fn new(cloud_reachable: bool, service_host_reachable: bool, local_agent_available: bool) -> Self {
        Self::observed_at(
            cloud_reachable,
            service_host_reachable,
            local_agent_available,
            Utc::now(),
        )
    }

    /// Creates a probe with an explicit observation time.
    pub fn observed_at(
        cloud_reachable: bool,
        service_host_reachable: bool,
        local_agent_available: bool,
        observed_at: DateTime<Utc>,
    ) -> Self {
        ReachabilityProbe {
            cloud_reachable,
            service_host_reachable,
            local_agent_available,
            observed_at,
        }
    }

    /// A probe where nothing answered.
    pub fn unreachable() -> Self {
        Self::new(false, false, false)
    }
}

// =============================================================================
// Config Version
// =============================================================================

/// Monotonic configuration version owned by the sync engine.
///
/// Persisted next to the local cache so it survives restarts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[ts(export)]
#[serde(transparent)]
pub struct ConfigVersion(i64);

impl ConfigVersion {
    /// Version of a cache that has never been synced.
    pub const ZERO: ConfigVersion = ConfigVersion(0);

    /// Creates a version from its raw value.
    #[inline]
    pub const fn new(value: i64) -> Self {
        ConfigVersion(value)
    }

    /// Returns the raw value.
    #[inline]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Returns true if a batch at this version may be applied on top of `current`.
    #[inline]
    pub fn supersedes(&self, current: ConfigVersion) -> bool {
        self.0 > current.0
    }
}

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ConfigVersion {
    fn from(value: i64) -> Self {
        ConfigVersion(value)
    }
}

// =============================================================================
// Config Change
// =============================================================================

/// What a change does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    /// Soft delete: the entity is marked inactive, never removed.
    Delete,
}

impl ChangeAction {
    /// Returns true for create/update, which carry a payload.
    pub fn is_upsert(&self) -> bool {
        matches!(self, ChangeAction::Create | ChangeAction::Update)
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Create => write!(f, "create"),
            ChangeAction::Update => write!(f, "update"),
            ChangeAction::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for ChangeAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

/// A single entity change inside a delta or push batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChange {
    /// Singular entity type name (e.g. `menuItem`).
    pub entity_type: String,

    /// Entity identifier within its type.
    pub entity_id: String,

    /// Create, update or delete.
    pub action: ChangeAction,

    /// Full entity payload for create/update; absent for delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub data: Option<Value>,
}

impl ConfigChange {
    /// Creates an upsert-style change.
    pub fn upsert(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: ChangeAction,
        data: Value,
    ) -> Self {
        ConfigChange {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            data: Some(data),
        }
    }

    /// Creates a delete change.
    pub fn delete(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        ConfigChange {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: ChangeAction::Delete,
            data: None,
        }
    }
}

/// An ordered batch of changes at a declared version.
///
/// Delta responses and push messages share this shape:
/// `{ "version": 6, "changes": [ ... ] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChangeBatch {
    pub version: ConfigVersion,

    /// Applied strictly in this order.
    #[serde(default)]
    pub changes: Vec<ConfigChange>,
}

impl ChangeBatch {
    pub fn new(version: impl Into<ConfigVersion>, changes: Vec<ConfigChange>) -> Self {
        ChangeBatch {
            version: version.into(),
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

// =============================================================================
// Stored Entity
// =============================================================================

/// An entity as held by the local configuration cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntity {
    pub entity_type: String,

    pub id: String,

    /// Opaque payload exactly as received from the cloud.
    #[ts(type = "unknown")]
    pub data: Value,

    /// False once soft deleted.
    pub active: bool,
}

impl StoredEntity {
    /// Builds the stored form of an upserted payload.
    ///
    /// `active` follows the payload's own boolean `active` field when present,
    /// otherwise the entity is active (a re-create after delete revives it).
    pub fn from_payload(entity_type: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
        let active = data
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        StoredEntity {
            entity_type: entity_type.into(),
            id: id.into(),
            data,
            active,
        }
    }

    /// Marks the entity inactive, mirroring the flag into an object payload.
    pub fn mark_inactive(&mut self) {
        self.active = false;
        if let Value::Object(map) = &mut self.data {
            map.insert("active".to_string(), Value::Bool(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_ordering() {
        assert!(ConnectivityTier::Green > ConnectivityTier::Yellow);
        assert!(ConnectivityTier::Yellow > ConnectivityTier::Orange);
        assert!(ConnectivityTier::Orange > ConnectivityTier::Red);
        assert_eq!(
            ConnectivityTier::ALL.iter().max(),
            Some(&ConnectivityTier::Green)
        );
    }

    #[test]
    fn test_tier_parsing_and_display() {
        assert_eq!("GREEN".parse::<ConnectivityTier>().unwrap(), ConnectivityTier::Green);
        assert_eq!("orange".parse::<ConnectivityTier>().unwrap(), ConnectivityTier::Orange);
        assert!("blue".parse::<ConnectivityTier>().is_err());
        assert_eq!(ConnectivityTier::Yellow.to_string(), "yellow");
        assert_eq!(serde_json::to_string(&ConnectivityTier::Red).unwrap(), "\"red\"");
    }

    #[test]
    fn test_only_green_allows_full_sync() {
        assert!(ConnectivityTier::Green.allows_full_sync());
        assert!(!ConnectivityTier::Yellow.allows_full_sync());
        assert!(!ConnectivityTier::Red.allows_full_sync());
        assert!(ConnectivityTier::Red.is_offline());
    }

    #[test]
    fn test_probe_wire_format_defaults_timestamp() {
        let probe: ReachabilityProbe = serde_json::from_value(json!({
            "cloudReachable": false,
            "serviceHostReachable": true,
            "localAgentAvailable": false
        }))
        .unwrap();
        assert!(!probe.cloud_reachable);
        assert!(probe.service_host_reachable);
    }

    #[test]
    fn test_version_supersedes() {
        let current = ConfigVersion::new(5);
        assert!(ConfigVersion::new(6).supersedes(current));
        assert!(!ConfigVersion::new(5).supersedes(current));
        assert!(!ConfigVersion::new(4).supersedes(current));
    }

    #[test]
    fn test_change_batch_deserializes_from_wire() {
        let batch: ChangeBatch = serde_json::from_value(json!({
            "version": 6,
            "changes": [
                { "entityType": "menuItem", "entityId": "a", "action": "delete" }
            ]
        }))
        .unwrap();
        assert_eq!(batch.version, ConfigVersion::new(6));
        assert_eq!(batch.changes[0].action, ChangeAction::Delete);
        assert!(batch.changes[0].data.is_none());
    }

    #[test]
    fn test_stored_entity_active_flag() {
        let entity = StoredEntity::from_payload("menuItem", "a", json!({"id": "a"}));
        assert!(entity.active);

        let entity = StoredEntity::from_payload("menuItem", "b", json!({"id": "b", "active": false}));
        assert!(!entity.active);

        let mut entity = StoredEntity::from_payload("menuItem", "c", json!({"id": "c", "active": true}));
        entity.mark_inactive();
        assert!(!entity.active);
        assert_eq!(entity.data["active"], json!(false));
    }
}
