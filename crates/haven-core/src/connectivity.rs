//! # Connectivity Tier Resolution
//!
//! Pure mapping from reachability probes to operating tiers, plus a small
//! hysteresis state machine layered on top.
//!
//! ## Resolution Priority
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     resolve(probe) → tier                               │
//! │                                                                         │
//! │   cloud_reachable?  ──yes──►  GREEN                                     │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │   service_host_reachable?  ──yes──►  YELLOW                             │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │   local_agent_available?  ──yes──►  ORANGE                              │
//! │        │ no                                                             │
//! │        ▼                                                                │
//! │      RED                                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Stabilization
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  downgrade_after = 3                                                    │
//! │                                                                         │
//! │  probe:     G   Y   G   Y   Y   Y   G                                   │
//! │  resolved:  G   Y   G   Y   Y   Y   G                                   │
//! │  pending:   0   1   0   1   2   3→0 0                                   │
//! │  tier:      G   G   G   G   G   Y   G   ◄── upgrade is immediate        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::types::{ConnectivityTier, ReachabilityProbe};

/// Maps a single probe to a tier. No state, no hysteresis.
pub fn resolve(probe: &ReachabilityProbe) -> ConnectivityTier {
    if probe.cloud_reachable {
        ConnectivityTier::Green
    } else if probe.service_host_reachable {
        ConnectivityTier::Yellow
    } else if probe.local_agent_available {
        ConnectivityTier::Orange
    } else {
        ConnectivityTier::Red
    }
}

// =============================================================================
// Tier Stabilizer
// =============================================================================

/// Suppresses tier flapping on transient probe failures.
///
/// Upgrades apply on a single probe. Downgrades need `downgrade_after`
/// consecutive probes that resolve below the current tier, and then adopt the
/// most recently resolved tier.
#[derive(Debug, Clone)]
pub struct TierStabilizer {
    downgrade_after: u32,
    current: Option<ConnectivityTier>,
    pending_downgrades: u32,
}

impl TierStabilizer {
    /// Creates a stabilizer. A threshold of 0 is treated as 1.
    pub fn new(downgrade_after: u32) -> Self {
        TierStabilizer {
            downgrade_after: downgrade_after.max(1),
            current: None,
            pending_downgrades: 0,
        }
    }

    /// Stabilizer that follows every probe immediately.
    pub fn immediate() -> Self {
        Self::new(1)
    }

    /// The stabilized tier, or `None` before the first probe.
    pub fn current(&self) -> Option<ConnectivityTier> {
        self.current
    }

    /// Consecutive lower-tier probes seen since the last reset.
    pub fn pending_downgrades(&self) -> u32 {
        self.pending_downgrades
    }

    /// Feeds a probe and returns the stabilized tier.
    pub fn observe(&mut self, probe: &ReachabilityProbe) -> ConnectivityTier {
        self.observe_tier(resolve(probe))
    }

    /// Feeds an already-resolved tier and returns the stabilized tier.
    pub fn observe_tier(&mut self, resolved: ConnectivityTier) -> ConnectivityTier {
        let current = match self.current {
            None => {
                self.current = Some(resolved);
                return resolved;
            }
            Some(current) => current,
        };

        if resolved >= current {
            self.pending_downgrades = 0;
            self.current = Some(resolved);
            return resolved;
        }

        self.pending_downgrades += 1;
        if self.pending_downgrades >= self.downgrade_after {
            self.pending_downgrades = 0;
            self.current = Some(resolved);
            return resolved;
        }

        current
    }
}

impl Default for TierStabilizer {
    fn default() -> Self {
        Self::new(3)
    }
}
