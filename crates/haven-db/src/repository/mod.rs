//! # Repository Module
//!
//! Repository implementations for the Haven POS configuration cache.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  ConfigSyncEngine (haven-sync)                                         │
//! │       │                                                                 │
//! │       │  store.upsert(entity) ──► db.config().upsert_entity(&entity)   │
//! │       ▼                                                                 │
//! │  ConfigRepository                                                      │
//! │  ├── upsert_entity / soft_delete / get_entity / list_entities          │
//! │  ├── set_scalar / get_scalar                                           │
//! │  ├── get_version / set_version                                         │
//! │  └── import_snapshot (single transaction)                              │
//! │       │                                                                 │
//! │       │  SQL                                                            │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ConfigRepository`](config::ConfigRepository) - Synced configuration cache

pub mod config;
