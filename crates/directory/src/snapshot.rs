//! Read-optimized directory snapshot.
//!
//! A snapshot is recomputed wholesale from its inputs; entries are never patched
//! in place. [`materialize`] is the single place the join and filter live.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use shopfront_core::{ItemId, ListingId, TenantId};
use shopfront_taxonomy::{Category, CategorySlug};

use crate::freshness::{ExclusionReason, FreshnessPolicy, eligibility};
use crate::listing::{GeoPoint, InventoryItemRecord, Listing};
use crate::promotion::{Promotion, PromotionState, PromotionTier};

/// Source rows for one materialization pass.
#[derive(Debug, Clone, Default)]
pub struct DirectoryInputs {
    pub listings: Vec<Listing>,
    pub items: Vec<InventoryItemRecord>,
    pub categories: Vec<Category>,
    pub promotions: Vec<Promotion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryCategory {
    pub slug: CategorySlug,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryItem {
    pub item_id: ItemId,
    pub sku: String,
    pub name: String,
    /// Only set when the item's category is active for the tenant.
    pub category: Option<CategorySlug>,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromotionBadge {
    pub tier: PromotionTier,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryEntry {
    pub listing_id: ListingId,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub address: String,
    pub geo: GeoPoint,
    pub last_sync_at: DateTime<Utc>,
    pub categories: Vec<DirectoryCategory>,
    pub items: Vec<DirectoryItem>,
    pub promotion: Option<PromotionBadge>,
}

impl DirectoryEntry {
    pub fn has_category(&self, slug: &CategorySlug) -> bool {
        self.categories.iter().any(|c| &c.slug == slug)
    }

    fn placement_rank(&self) -> u8 {
        self.promotion.map(|p| p.tier.rank()).unwrap_or(0)
    }
}

/// Counters describing how a snapshot was derived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub considered: usize,
    pub included: usize,
    pub excluded: BTreeMap<ExclusionReason, usize>,
}

impl SnapshotStats {
    pub fn excluded_for(&self, reason: ExclusionReason) -> usize {
        self.excluded.get(&reason).copied().unwrap_or(0)
    }
}

/// Immutable, fully built directory.
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    generation: u64,
    built_at: DateTime<Utc>,
    freshness_window: Duration,
    entries: Vec<DirectoryEntry>,
    by_listing: HashMap<ListingId, usize>,
    stats: SnapshotStats,
}

impl DirectorySnapshot {
    /// The snapshot readers see before the first refresh.
    pub fn empty(built_at: DateTime<Utc>) -> Self {
        Self {
            generation: 0,
            built_at,
            freshness_window: FreshnessPolicy::default().window(),
            entries: Vec::new(),
            by_listing: HashMap::new(),
            stats: SnapshotStats::default(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }

    /// Entries in placement order: promoted first by tier, then by display name.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, listing_id: ListingId) -> Option<&DirectoryEntry> {
        self.by_listing.get(&listing_id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, listing_id: ListingId) -> bool {
        self.by_listing.contains_key(&listing_id)
    }

    pub fn for_tenant(&self, tenant_id: TenantId) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter().filter(move |e| e.tenant_id == tenant_id)
    }

    pub fn in_category<'a>(&'a self, slug: &'a CategorySlug) -> impl Iterator<Item = &'a DirectoryEntry> {
        self.entries.iter().filter(move |e| e.has_category(slug))
    }

    pub fn promoted(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter().filter(|e| e.promotion.is_some())
    }

    /// Entries within `radius_km` of `point`, nearest first.
    pub fn nearby(&self, point: &GeoPoint, radius_km: f64) -> Vec<(&DirectoryEntry, f64)> {
        let mut hits: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e, e.geo.distance_km(point)))
            .filter(|(_, d)| *d <= radius_km)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }
}

/// Build a complete snapshot from source rows.
///
/// A listing is included only if it passes [`eligibility`] and its tenant has at
/// least one active, public inventory item. Items and categories are joined only
/// when individually active (and, for items, public).
pub fn materialize(
    inputs: &DirectoryInputs,
    policy: &FreshnessPolicy,
    now: DateTime<Utc>,
    generation: u64,
) -> DirectorySnapshot {
    let mut active_categories: HashMap<(TenantId, &CategorySlug), &Category> = HashMap::new();
    for c in inputs.categories.iter().filter(|c| c.active) {
        active_categories.entry((c.tenant_scope, &c.slug)).or_insert(c);
    }

    let mut items_by_tenant: HashMap<TenantId, Vec<&InventoryItemRecord>> = HashMap::new();
    for item in inputs.items.iter().filter(|i| i.is_listable()) {
        items_by_tenant.entry(item.tenant_id).or_default().push(item);
    }

    let promotions: HashMap<ListingId, &Promotion> =
        inputs.promotions.iter().map(|p| (p.listing_id(), p)).collect();

    let mut stats = SnapshotStats {
        considered: inputs.listings.len(),
        ..SnapshotStats::default()
    };
    let mut entries = Vec::new();

    for listing in &inputs.listings {
        if let Err(reason) = eligibility(listing, policy, now) {
            *stats.excluded.entry(reason).or_default() += 1;
            continue;
        }
        let Some(tenant_items) = items_by_tenant.get(&listing.tenant_id) else {
            *stats.excluded.entry(ExclusionReason::NoPublicInventory).or_default() += 1;
            continue;
        };

        let mut categories: BTreeMap<&CategorySlug, &Category> = BTreeMap::new();
        let mut items: Vec<DirectoryItem> = tenant_items
            .iter()
            .map(|item| {
                let category = item.category.as_ref().and_then(|slug| {
                    active_categories
                        .get(&(listing.tenant_id, slug))
                        .copied()
                        .map(|c| {
                            categories.insert(&c.slug, c);
                            c.slug.clone()
                        })
                });
                DirectoryItem {
                    item_id: item.item_id,
                    sku: item.sku.clone(),
                    name: item.name.clone(),
                    category,
                    quantity: item.quantity,
                }
            })
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.sku.cmp(&b.sku)));

        let promotion = promotions.get(&listing.listing_id).and_then(|p| match p.state() {
            PromotionState::Promoted {
                tier,
                started_at,
                expires_at,
            } => Some(PromotionBadge {
                tier,
                started_at,
                expires_at,
            }),
            PromotionState::NotPromoted => None,
        });

        entries.push(DirectoryEntry {
            listing_id: listing.listing_id,
            tenant_id: listing.tenant_id,
            display_name: listing.display_name.clone(),
            address: listing.address.clone(),
            geo: listing.geo,
            // eligibility() guarantees a sync timestamp
            last_sync_at: listing.last_sync_at.unwrap_or(now),
            categories: categories
                .into_values()
                .map(|c| DirectoryCategory {
                    slug: c.slug.clone(),
                    name: c.name.clone(),
                })
                .collect(),
            items,
            promotion,
        });
    }

    entries.sort_by(|a, b| {
        b.placement_rank()
            .cmp(&a.placement_rank())
            .then_with(|| a.display_name.cmp(&b.display_name))
            .then_with(|| a.listing_id.cmp(&b.listing_id))
    });
    stats.included = entries.len();

    let by_listing = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.listing_id, i))
        .collect();

    DirectorySnapshot {
        generation,
        built_at: now,
        freshness_window: policy.window(),
        entries,
        by_listing,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::LocationStatus;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    struct Fixture {
        inputs: DirectoryInputs,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                inputs: DirectoryInputs::default(),
            }
        }

        fn listing(&mut self, name: &str, synced_hours_ago: i64) -> (TenantId, ListingId) {
            let tenant_id = TenantId::new();
            let listing_id = ListingId::new();
            self.inputs.listings.push(Listing {
                listing_id,
                tenant_id,
                display_name: name.to_string(),
                address: format!("{name} street"),
                geo: GeoPoint::new(45.5, -122.6).unwrap(),
                sync_enabled: true,
                last_sync_at: Some(now() - Duration::hours(synced_hours_ago)),
                visible: true,
                location_status: LocationStatus::Active,
            });
            self.inputs.promotions.push(Promotion::new(listing_id));
            (tenant_id, listing_id)
        }

        fn item(&mut self, tenant_id: TenantId, name: &str, category: Option<&str>, active: bool, public: bool) {
            self.inputs.items.push(InventoryItemRecord {
                item_id: ItemId::new(),
                tenant_id,
                sku: format!("SKU-{name}"),
                name: name.to_string(),
                category: category.map(|c| CategorySlug::parse(c).unwrap()),
                quantity: 3,
                active,
                public,
            });
        }

        fn category(&mut self, tenant_id: TenantId, slug: &str, active: bool) {
            let mut c = Category::new(tenant_id, slug, &slug.to_uppercase()).unwrap();
            c.active = active;
            self.inputs.categories.push(c);
        }

        fn promote(&mut self, listing_id: ListingId, tier: PromotionTier) {
            let p = self
                .inputs
                .promotions
                .iter_mut()
                .find(|p| p.listing_id() == listing_id)
                .unwrap();
            p.promote(tier, Duration::days(3), now() - Duration::hours(1)).unwrap();
        }

        fn build(&self) -> DirectorySnapshot {
            materialize(&self.inputs, &FreshnessPolicy::default(), now(), 1)
        }
    }

    #[test]
    fn freshness_window_filters_listings() {
        let mut f = Fixture::new();
        let (fresh_tenant, fresh) = f.listing("Fresh", 23);
        let (stale_tenant, stale) = f.listing("Stale", 25);
        f.item(fresh_tenant, "hammer", None, true, true);
        f.item(stale_tenant, "saw", None, true, true);

        let snapshot = f.build();

        assert!(snapshot.contains(fresh));
        assert!(!snapshot.contains(stale));
        assert_eq!(snapshot.stats().excluded_for(ExclusionReason::Stale), 1);
        assert_eq!(snapshot.stats().considered, 2);
        assert_eq!(snapshot.stats().included, 1);
    }

    #[test]
    fn only_active_public_items_and_active_categories_are_joined() {
        let mut f = Fixture::new();
        let (tenant, listing) = f.listing("Shop", 1);
        f.category(tenant, "tools", true);
        f.category(tenant, "seasonal", false);
        f.item(tenant, "hammer", Some("tools"), true, true);
        f.item(tenant, "wreath", Some("seasonal"), true, true);
        f.item(tenant, "prototype", Some("tools"), true, false);
        f.item(tenant, "discontinued", Some("tools"), false, true);

        let snapshot = f.build();
        let entry = snapshot.get(listing).unwrap();

        let names: Vec<_> = entry.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["hammer", "wreath"]);
        assert_eq!(entry.categories.len(), 1);
        assert_eq!(entry.categories[0].slug.as_str(), "tools");
        assert_eq!(entry.items[1].category, None);
    }

    #[test]
    fn listing_without_public_inventory_is_excluded() {
        let mut f = Fixture::new();
        let (tenant, listing) = f.listing("Empty", 1);
        f.item(tenant, "hidden", None, true, false);

        let snapshot = f.build();

        assert!(!snapshot.contains(listing));
        assert_eq!(snapshot.stats().excluded_for(ExclusionReason::NoPublicInventory), 1);
    }

    #[test]
    fn categories_do_not_leak_across_tenants() {
        let mut f = Fixture::new();
        let (a, listing_a) = f.listing("A", 1);
        let (b, _) = f.listing("B", 1);
        f.category(b, "tools", true);
        f.item(a, "hammer", Some("tools"), true, true);
        f.item(b, "saw", Some("tools"), true, true);

        let snapshot = f.build();

        assert!(snapshot.get(listing_a).unwrap().categories.is_empty());
        assert_eq!(snapshot.for_tenant(b).count(), 1);
    }

    #[test]
    fn promoted_entries_sort_first_by_tier() {
        let mut f = Fixture::new();
        let (t1, aardvark) = f.listing("Aardvark Supply", 1);
        let (t2, basic) = f.listing("Basic Bikes", 1);
        let (t3, featured) = f.listing("Zebra Goods", 1);
        for t in [t1, t2, t3] {
            f.item(t, "thing", None, true, true);
        }
        f.promote(basic, PromotionTier::Basic);
        f.promote(featured, PromotionTier::Featured);

        let snapshot = f.build();
        let order: Vec<_> = snapshot.entries().iter().map(|e| e.listing_id).collect();

        assert_eq!(order, vec![featured, basic, aardvark]);
        assert_eq!(snapshot.promoted().count(), 2);
        assert_eq!(
            snapshot.get(featured).unwrap().promotion.map(|p| p.tier),
            Some(PromotionTier::Featured)
        );
    }

    #[test]
    fn category_and_geo_queries() {
        let mut f = Fixture::new();
        let (t1, near) = f.listing("Near", 1);
        let (t2, far) = f.listing("Far", 1);
        f.inputs.listings[1].geo = GeoPoint::new(47.6, -122.3).unwrap();
        f.category(t1, "garden", true);
        f.item(t1, "rake", Some("garden"), true, true);
        f.item(t2, "hose", None, true, true);

        let snapshot = f.build();
        let garden = CategorySlug::parse("Garden").unwrap();

        let in_garden: Vec<_> = snapshot.in_category(&garden).map(|e| e.listing_id).collect();
        assert_eq!(in_garden, vec![near]);

        let origin = GeoPoint::new(45.5, -122.6).unwrap();
        let hits = snapshot.nearby(&origin, 50.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.listing_id, near);
        assert!(snapshot.nearby(&origin, 500.0).iter().any(|(e, _)| e.listing_id == far));
    }

    #[test]
    fn empty_snapshot_has_generation_zero() {
        let snapshot = DirectorySnapshot::empty(now());
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.is_empty());
    }
}
