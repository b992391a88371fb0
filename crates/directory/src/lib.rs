//! Directory domain (pure, no IO).
//!
//! Listings, paid promotions and the read-optimized directory snapshot derived
//! from them. Everything here is deterministic given its inputs and `now`.

pub mod freshness;
pub mod listing;
pub mod promotion;
pub mod snapshot;

pub use freshness::{DEFAULT_FRESHNESS_WINDOW_HOURS, ExclusionReason, FreshnessPolicy, eligibility};
pub use listing::{GeoPoint, InventoryItemRecord, Listing, LocationStatus};
pub use promotion::{
    EngagementCounter, Promotion, PromotionError, PromotionRecord, PromotionState, PromotionTier,
};
pub use snapshot::{
    DirectoryCategory, DirectoryEntry, DirectoryInputs, DirectoryItem, DirectorySnapshot,
    PromotionBadge, SnapshotStats, materialize,
};
