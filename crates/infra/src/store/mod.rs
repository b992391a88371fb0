//! Persistence seams for listings, inventory, categories and promotions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use shopfront_core::{ListingId, TenantId};
use shopfront_directory::{DirectoryInputs, EngagementCounter, Promotion};
use shopfront_taxonomy::{Category, CategorySlug};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCatalogStore;
pub use postgres::PostgresCatalogStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Everything materialization reads, taken as one consistent view.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn load_directory_inputs(&self) -> Result<DirectoryInputs, StoreError>;
}

/// Per-listing promotion rows.
///
/// Every known listing has a promotion row; `load_promotion` returns `None`
/// only for unknown listings.
#[async_trait]
pub trait PromotionStore: Send + Sync {
    async fn load_promotion(&self, listing_id: ListingId) -> Result<Option<Promotion>, StoreError>;

    async fn save_promotion(&self, promotion: &Promotion) -> Result<(), StoreError>;

    /// Atomically bump `counter` if the listing is currently promoted.
    ///
    /// Returns whether the counter moved.
    async fn increment_counter(
        &self,
        listing_id: ListingId,
        counter: EngagementCounter,
    ) -> Result<bool, StoreError>;

    /// Clear every promotion with `expires_at <= now` in one atomic batch.
    ///
    /// Returns the listings that transitioned.
    async fn expire_promotions(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>, StoreError>;
}

/// The internal category taxonomy, per tenant.
#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn categories_for(&self, scope: TenantId) -> Result<Vec<Category>, StoreError>;

    async fn upsert_category(&self, category: &Category) -> Result<(), StoreError>;

    /// Returns whether a row was removed.
    async fn remove_category(&self, scope: TenantId, slug: &CategorySlug) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S: DirectorySource + ?Sized> DirectorySource for Arc<S> {
    async fn load_directory_inputs(&self) -> Result<DirectoryInputs, StoreError> {
        (**self).load_directory_inputs().await
    }
}

#[async_trait]
impl<S: PromotionStore + ?Sized> PromotionStore for Arc<S> {
    async fn load_promotion(&self, listing_id: ListingId) -> Result<Option<Promotion>, StoreError> {
        (**self).load_promotion(listing_id).await
    }

    async fn save_promotion(&self, promotion: &Promotion) -> Result<(), StoreError> {
        (**self).save_promotion(promotion).await
    }

    async fn increment_counter(
        &self,
        listing_id: ListingId,
        counter: EngagementCounter,
    ) -> Result<bool, StoreError> {
        (**self).increment_counter(listing_id, counter).await
    }

    async fn expire_promotions(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>, StoreError> {
        (**self).expire_promotions(now).await
    }
}

#[async_trait]
impl<S: CategoryStore + ?Sized> CategoryStore for Arc<S> {
    async fn categories_for(&self, scope: TenantId) -> Result<Vec<Category>, StoreError> {
        (**self).categories_for(scope).await
    }

    async fn upsert_category(&self, category: &Category) -> Result<(), StoreError> {
        (**self).upsert_category(category).await
    }

    async fn remove_category(&self, scope: TenantId, slug: &CategorySlug) -> Result<bool, StoreError> {
        (**self).remove_category(scope, slug).await
    }
}
