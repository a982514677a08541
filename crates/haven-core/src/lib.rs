//! # haven-core: Pure Data Model for Haven POS Offline Resilience
//!
//! This crate holds the types and pure functions shared by the local cache
//! and the sync layer. Nothing in here touches the network, the disk, or a
//! timer.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Haven POS Offline Resilience                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Status UI / Admin screens (external, not here)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ tier, cached config                    │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   haven-sync: retry, circuit breaker, sync engine, monitor      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ haven-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────┐  │   │
//! │  │   │   types    │  │connectivity│  │   schema   │  │validation│  │   │
//! │  │   │ Tier,Probe │  │  resolve   │  │  Snapshot  │  │  batches │  │   │
//! │  │   │ Change     │  │ Stabilizer │  │ SyncSchema │  │          │  │   │
//! │  │   └────────────┘  └────────────┘  └────────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                haven-db (local configuration cache)             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Tiers, probes, versions, changes, stored entities
//! - [`connectivity`] - `resolve` and the `TierStabilizer`
//! - [`schema`] - Full-sync snapshot parsing against a `SyncSchema`
//! - [`validation`] - Delta / push batch validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use haven_core::{resolve, ConnectivityTier, ReachabilityProbe};
//!
//! let probe = ReachabilityProbe::new(false, true, true);
//! assert_eq!(resolve(&probe), ConnectivityTier::Yellow);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod connectivity;
pub mod error;
pub mod schema;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use connectivity::{resolve, TierStabilizer};
pub use error::{CoreError, CoreResult, ValidationError};
pub use schema::{entity_id_of, CollectionSpec, ConfigSnapshot, SyncSchema};
pub use types::*;
pub use validation::parse_change_batch;
