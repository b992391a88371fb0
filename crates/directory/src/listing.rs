use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfront_core::{DomainError, DomainResult, ItemId, ListingId, TenantId};
use shopfront_taxonomy::CategorySlug;

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> DomainResult<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(DomainError::validation(format!(
                "coordinate out of range: ({lat}, {lon})"
            )));
        }
        Ok(Self { lat, lon })
    }

    /// Great-circle distance (haversine).
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Operational status of the physical location behind a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Active,
    Pending,
    Suspended,
    Closed,
}

/// Directory-facing projection of a tenant location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: ListingId,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub address: String,
    pub geo: GeoPoint,
    pub sync_enabled: bool,
    /// Last successful sync with the external directory; `None` if never synced.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub visible: bool,
    pub location_status: LocationStatus,
}

/// Inventory row as read for materialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItemRecord {
    pub item_id: ItemId,
    pub tenant_id: TenantId,
    pub sku: String,
    pub name: String,
    pub category: Option<CategorySlug>,
    pub quantity: i64,
    pub active: bool,
    pub public: bool,
}

impl InventoryItemRecord {
    pub fn is_listable(&self) -> bool {
        self.active && self.public
    }
}
