//! # Sync Schema & Snapshots
//!
//! Maps the open-ended full-sync response onto entity collections and scalar
//! configuration blobs.
//!
//! ## Full-Sync Response Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  {                                                                      │
//! │    "version": 5,                    ◄── required                        │
//! │    "menuItems": [ {...}, ... ],     ◄── collection (schema key)         │
//! │    "categories": [ ... ],           ◄── collection (schema key)         │
//! │    "storeSettings": { ... },        ◄── scalar blob (schema key)        │
//! │    "somethingNew": ...              ◄── unknown key: ignored            │
//! │  }                                                                      │
//! │                                                                         │
//! │  Missing collection / scalar keys mean "no change for that kind".      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::types::ConfigVersion;

// =============================================================================
// Schema
// =============================================================================

/// One entity collection in the full-sync response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Field name in the full-sync response (plural, e.g. `menuItems`).
    pub key: String,

    /// Entity type used by deltas and the local cache (e.g. `menuItem`).
    pub entity_type: String,
}

impl CollectionSpec {
    pub fn new(key: impl Into<String>, entity_type: impl Into<String>) -> Self {
        CollectionSpec {
            key: key.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// The set of collections and scalar keys this node understands.
///
/// Anything the cloud sends outside this schema is ignored so that newer
/// cloud schemas never break older terminals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSchema {
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,

    #[serde(default)]
    pub scalars: Vec<String>,
}

impl Default for SyncSchema {
    fn default() -> Self {
        let collections = [
            ("menuItems", "menuItem"),
            ("categories", "category"),
            ("modifierGroups", "modifierGroup"),
            ("modifiers", "modifier"),
            ("taxRates", "taxRate"),
            ("discounts", "discount"),
            ("employees", "employee"),
            ("diningTables", "diningTable"),
            ("printers", "printer"),
            ("kitchenStations", "kitchenStation"),
        ]
        .into_iter()
        .map(|(key, entity_type)| CollectionSpec::new(key, entity_type))
        .collect();

        let scalars = ["storeSettings", "receiptSettings", "taxSettings", "businessHours"]
            .into_iter()
            .map(String::from)
            .collect();

        SyncSchema {
            collections,
            scalars,
        }
    }
}

impl SyncSchema {
    /// Returns true if deltas for this entity type should be applied.
    pub fn knows_entity_type(&self, entity_type: &str) -> bool {
        self.collections.iter().any(|c| c.entity_type == entity_type)
    }

    /// Looks up the collection spec for a response key.
    pub fn collection_for_key(&self, key: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.key == key)
    }

    /// Returns true if `key` is a scalar config key.
    pub fn is_scalar(&self, key: &str) -> bool {
        self.scalars.iter().any(|s| s == key)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// The entire cloud-side configuration at one version.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigSnapshot {
    pub version: ConfigVersion,

    /// Entity type → entities, in response order.
    pub collections: BTreeMap<String, Vec<Value>>,

    /// Scalar key → opaque blob.
    pub scalar_config: BTreeMap<String, Value>,
}

impl ConfigSnapshot {
    /// Parses a full-sync response against `schema`.
    ///
    /// Unknown keys are dropped. Known collection keys must hold arrays.
    pub fn from_response(response: &Value, schema: &SyncSchema) -> Result<Self, ValidationError> {
        let object = response
            .as_object()
            .ok_or_else(|| ValidationError::NotAnObject {
                context: "full sync response".into(),
            })?;

        let version = parse_version(object.get("version"))?;

        let mut snapshot = ConfigSnapshot {
            version,
            ..Default::default()
        };

        for (key, value) in object {
            if key == "version" {
                continue;
            }

            if let Some(spec) = schema.collection_for_key(key) {
                let entities = value
                    .as_array()
                    .ok_or_else(|| ValidationError::wrong_type(key.as_str(), "an array"))?;
                snapshot
                    .collections
                    .entry(spec.entity_type.clone())
                    .or_default()
                    .extend(entities.iter().cloned());
            } else if schema.is_scalar(key) {
                snapshot.scalar_config.insert(key.clone(), value.clone());
            }
        }

        Ok(snapshot)
    }

    /// Total number of entities across all collections.
    pub fn entity_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}

/// Extracts an entity's id: a string, or a number rendered as a string.
pub fn entity_id_of(entity: &Value) -> Option<String> {
    match entity.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses a non-negative integer `version` field.
pub(crate) fn parse_version(value: Option<&Value>) -> Result<ConfigVersion, ValidationError> {
    let value = value.ok_or_else(|| ValidationError::missing("version"))?;
    let raw = value
        .as_i64()
        .ok_or_else(|| ValidationError::wrong_type("version", "an integer"))?;

    if raw < 0 {
        return Err(ValidationError::NegativeVersion(raw));
    }

    Ok(ConfigVersion::new(raw))
}
