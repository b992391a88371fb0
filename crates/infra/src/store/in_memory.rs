//! In-memory catalog store.
//!
//! All tables sit behind one lock so reads see a consistent view and the expiry
//! sweep is a single atomic batch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shopfront_core::{ItemId, ListingId, TenantId};
use shopfront_directory::{DirectoryInputs, EngagementCounter, InventoryItemRecord, Listing, Promotion};
use shopfront_taxonomy::{Category, CategorySlug};

use super::{CategoryStore, DirectorySource, PromotionStore, StoreError};

#[derive(Debug, Default)]
struct CatalogTables {
    listings: BTreeMap<ListingId, Listing>,
    items: BTreeMap<ItemId, InventoryItemRecord>,
    categories: BTreeMap<(TenantId, CategorySlug), Category>,
    promotions: HashMap<ListingId, Promotion>,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    tables: RwLock<CatalogTables>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, CatalogTables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("catalog lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, CatalogTables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("catalog lock poisoned".to_string()))
    }

    /// Insert or replace a listing. A new listing starts unpromoted.
    pub fn upsert_listing(&self, listing: Listing) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let listing_id = listing.listing_id;
        tables.listings.insert(listing_id, listing);
        tables
            .promotions
            .entry(listing_id)
            .or_insert_with(|| Promotion::new(listing_id));
        Ok(())
    }

    /// Record a completed external sync for a listing.
    pub fn mark_synced(&self, listing_id: ListingId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let listing = tables
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| StoreError::NotFound(format!("listing {listing_id}")))?;
        listing.last_sync_at = Some(at);
        Ok(())
    }

    pub fn upsert_item(&self, item: InventoryItemRecord) -> Result<(), StoreError> {
        self.write()?.items.insert(item.item_id, item);
        Ok(())
    }

    pub fn promotion(&self, listing_id: ListingId) -> Result<Option<Promotion>, StoreError> {
        Ok(self.read()?.promotions.get(&listing_id).cloned())
    }
}

#[async_trait]
impl DirectorySource for InMemoryCatalogStore {
    async fn load_directory_inputs(&self) -> Result<DirectoryInputs, StoreError> {
        let tables = self.read()?;
        Ok(DirectoryInputs {
            listings: tables.listings.values().cloned().collect(),
            items: tables.items.values().cloned().collect(),
            categories: tables.categories.values().cloned().collect(),
            promotions: tables.promotions.values().cloned().collect(),
        })
    }
}

#[async_trait]
impl PromotionStore for InMemoryCatalogStore {
    async fn load_promotion(&self, listing_id: ListingId) -> Result<Option<Promotion>, StoreError> {
        self.promotion(listing_id)
    }

    async fn save_promotion(&self, promotion: &Promotion) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let listing_id = promotion.listing_id();
        if !tables.listings.contains_key(&listing_id) {
            return Err(StoreError::NotFound(format!("listing {listing_id}")));
        }
        tables.promotions.insert(listing_id, promotion.clone());
        Ok(())
    }

    async fn increment_counter(
        &self,
        listing_id: ListingId,
        counter: EngagementCounter,
    ) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        Ok(tables
            .promotions
            .get_mut(&listing_id)
            .is_some_and(|p| p.record(counter)))
    }

    async fn expire_promotions(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>, StoreError> {
        let mut tables = self.write()?;
        let mut expired: Vec<ListingId> = tables
            .promotions
            .values_mut()
            .filter_map(|p| p.expire(now).then(|| p.listing_id()))
            .collect();
        expired.sort();
        Ok(expired)
    }
}

#[async_trait]
impl CategoryStore for InMemoryCatalogStore {
    async fn categories_for(&self, scope: TenantId) -> Result<Vec<Category>, StoreError> {
        Ok(self
            .read()?
            .categories
            .values()
            .filter(|c| c.tenant_scope == scope)
            .cloned()
            .collect())
    }

    async fn upsert_category(&self, category: &Category) -> Result<(), StoreError> {
        self.write()?
            .categories
            .insert((category.tenant_scope, category.slug.clone()), category.clone());
        Ok(())
    }

    async fn remove_category(&self, scope: TenantId, slug: &CategorySlug) -> Result<bool, StoreError> {
        Ok(self
            .write()?
            .categories
            .remove(&(scope, slug.clone()))
            .is_some())
    }
}
