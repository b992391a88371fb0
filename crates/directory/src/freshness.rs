//! Listing eligibility for the public directory.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use shopfront_core::{DomainError, DomainResult};

use crate::listing::{Listing, LocationStatus};

/// Default maximum age of a listing's last successful sync.
pub const DEFAULT_FRESHNESS_WINDOW_HOURS: i64 = 24;

/// Staleness bound applied at materialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    window: Duration,
}

impl FreshnessPolicy {
    pub fn new(window: Duration) -> DomainResult<Self> {
        if window <= Duration::zero() {
            return Err(DomainError::validation("freshness window must be positive"));
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// `now - last_sync_at <= window`. Never-synced listings are not fresh.
    pub fn is_fresh(&self, last_sync_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_sync_at {
            Some(at) => now.signed_duration_since(at) <= self.window,
            None => false,
        }
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            window: Duration::hours(DEFAULT_FRESHNESS_WINDOW_HOURS),
        }
    }
}

/// Why a listing was left out of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    SyncDisabled,
    NeverSynced,
    Stale,
    Hidden,
    LocationInactive,
    NoPublicInventory,
}

/// Checks the listing-level predicate (sync, freshness, visibility, location).
///
/// Inventory is checked separately during the join.
pub fn eligibility(
    listing: &Listing,
    policy: &FreshnessPolicy,
    now: DateTime<Utc>,
) -> Result<(), ExclusionReason> {
    if !listing.sync_enabled {
        return Err(ExclusionReason::SyncDisabled);
    }
    if listing.last_sync_at.is_none() {
        return Err(ExclusionReason::NeverSynced);
    }
    if !policy.is_fresh(listing.last_sync_at, now) {
        return Err(ExclusionReason::Stale);
    }
    if !listing.visible {
        return Err(ExclusionReason::Hidden);
    }
    if listing.location_status != LocationStatus::Active {
        return Err(ExclusionReason::LocationInactive);
    }
    Ok(())
}
