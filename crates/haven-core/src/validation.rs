//! # Validation Module
//!
//! Validation of change batches arriving from the delta endpoint or the push
//! socket.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (shape)                                          │
//! │  ├── version present, integer, non-negative                            │
//! │  ├── changes is an array                                               │
//! │  └── each change has entityType / entityId / action                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Sync engine (semantics)                                      │
//! │  ├── stale version → no-op                                             │
//! │  ├── unknown entityType → logged, skipped                              │
//! │  └── upsert without data → logged, skipped                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Local store                                                  │
//! │  └── PRIMARY KEY (entity_type, entity_id)                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use haven_core::validation::parse_change_batch;
//! use serde_json::json;
//!
//! let batch = parse_change_batch(&json!({
//!     "version": 6,
//!     "changes": [{ "entityType": "menuItem", "entityId": "a", "action": "delete" }]
//! }))
//! .unwrap();
//! assert_eq!(batch.len(), 1);
//! ```

use serde_json::Value;

use crate::error::ValidationError;
use crate::schema::parse_version;
use crate::types::{ChangeAction, ChangeBatch, ConfigChange};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Batch Parsing
// =============================================================================

/// Parses and validates a `{ version, changes }` payload.
///
/// ## Rules
/// - `version` must be a non-negative integer
/// - `changes` may be missing (treated as empty) but must be an array if set
/// - every change must carry a non-empty `entityType` and `entityId`
///   (numeric ids are accepted and rendered as strings)
/// - `action` must be `create`, `update` or `delete`
pub fn parse_change_batch(payload: &Value) -> ValidationResult<ChangeBatch> {
    let object = payload
        .as_object()
        .ok_or_else(|| ValidationError::NotAnObject {
            context: "change batch".into(),
        })?;

    let version = parse_version(object.get("version"))?;

    let changes = match object.get("changes") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| parse_change(index, item))
            .collect::<ValidationResult<Vec<_>>>()?,
        Some(_) => return Err(ValidationError::wrong_type("changes", "an array")),
    };

    Ok(ChangeBatch { version, changes })
}

fn parse_change(index: usize, item: &Value) -> ValidationResult<ConfigChange> {
    let invalid = |reason: &str| ValidationError::InvalidChange {
        index,
        reason: reason.to_string(),
    };

    let object = item.as_object().ok_or_else(|| invalid("not an object"))?;

    let entity_type = object
        .get("entityType")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| invalid("missing entityType"))?;

    let entity_id = match object.get("entityId") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(invalid("missing entityId")),
    };

    let action: ChangeAction = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing action"))?
        .parse()
        .map_err(|_| invalid("action must be create, update or delete"))?;

    let data = match object.get("data") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.clone()),
    };

    Ok(ConfigChange {
        entity_type: entity_type.to_string(),
        entity_id,
        action,
        data,
    })
}
