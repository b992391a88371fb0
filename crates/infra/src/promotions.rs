//! Promotion lifecycle: start, engagement counting and the expiry sweep.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use shopfront_core::{Clock, ListingId};
use shopfront_directory::{EngagementCounter, Promotion, PromotionError, PromotionTier};

use crate::store::{PromotionStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error(transparent)]
    Invalid(#[from] PromotionError),

    #[error("listing not found: {0}")]
    ListingNotFound(ListingId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// The request itself was bad; nothing was written.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub swept_at: DateTime<Utc>,
    pub expired: Vec<ListingId>,
}

impl SweepReport {
    pub fn count(&self) -> usize {
        self.expired.len()
    }
}

pub struct PromotionLifecycleManager<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: PromotionStore> PromotionLifecycleManager<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start or restart a promotion for `duration` from now.
    ///
    /// `tier` and `duration` are validated before the store is touched.
    #[instrument(skip(self), fields(listing_id = %listing_id), err)]
    pub async fn promote(
        &self,
        listing_id: ListingId,
        tier: &str,
        duration: Duration,
    ) -> Result<Promotion, LifecycleError> {
        let tier = PromotionTier::parse(tier)?;
        if duration <= Duration::zero() {
            return Err(PromotionError::InvalidDuration.into());
        }

        let mut promotion = self
            .store
            .load_promotion(listing_id)
            .await?
            .ok_or(LifecycleError::ListingNotFound(listing_id))?;

        let restarted = promotion.is_promoted();
        promotion.promote(tier, duration, self.clock.now())?;
        self.store.save_promotion(&promotion).await?;

        info!(
            tier = tier.as_str(),
            expires_at = ?promotion.expires_at(),
            restarted,
            "listing promoted"
        );
        Ok(promotion)
    }

    /// Count an impression. Returns `false` when the listing is not promoted.
    pub async fn record_impression(&self, listing_id: ListingId) -> Result<bool, LifecycleError> {
        Ok(self
            .store
            .increment_counter(listing_id, EngagementCounter::Impressions)
            .await?)
    }

    /// Count a click. Returns `false` when the listing is not promoted.
    pub async fn record_click(&self, listing_id: ListingId) -> Result<bool, LifecycleError> {
        Ok(self
            .store
            .increment_counter(listing_id, EngagementCounter::Clicks)
            .await?)
    }

    pub async fn get(&self, listing_id: ListingId) -> Result<Option<Promotion>, LifecycleError> {
        Ok(self.store.load_promotion(listing_id).await?)
    }

    /// Expire every promotion whose window ended at or before `now`.
    #[instrument(skip(self), err)]
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, LifecycleError> {
        let expired = self.store.expire_promotions(now).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "expired promotions cleared");
        }
        Ok(SweepReport { swept_at: now, expired })
    }

    /// Sweep using the manager's clock.
    pub async fn sweep_expired_now(&self) -> Result<SweepReport, LifecycleError> {
        self.sweep_expired(self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCatalogStore;
    use chrono::TimeZone;
    use shopfront_core::{ManualClock, TenantId};
    use shopfront_directory::{GeoPoint, Listing, LocationStatus};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap()
    }

    fn setup() -> (
        PromotionLifecycleManager<Arc<InMemoryCatalogStore>>,
        Arc<InMemoryCatalogStore>,
        Arc<ManualClock>,
        ListingId,
    ) {
        let store = Arc::new(InMemoryCatalogStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let listing_id = ListingId::new();
        store
            .upsert_listing(Listing {
                listing_id,
                tenant_id: TenantId::new(),
                display_name: "Bike Shop".to_string(),
                address: "2 River Rd".to_string(),
                geo: GeoPoint::new(51.5, -0.1).unwrap(),
                sync_enabled: true,
                last_sync_at: Some(t0()),
                visible: true,
                location_status: LocationStatus::Active,
            })
            .unwrap();
        let manager = PromotionLifecycleManager::new(store.clone(), clock.clone());
        (manager, store, clock, listing_id)
    }

    #[tokio::test]
    async fn promote_sets_window_from_clock() {
        let (manager, _, _, id) = setup();
        let p = manager.promote(id, "Featured", Duration::days(7)).await.unwrap();
        assert_eq!(p.tier(), Some(PromotionTier::Featured));
        assert_eq!(p.expires_at(), Some(t0() + Duration::days(7)));
    }

    #[tokio::test]
    async fn invalid_tier_writes_nothing() {
        let (manager, store, _, id) = setup();
        let err = manager.promote(id, "platinum", Duration::days(7)).await.unwrap_err();
        assert!(err.is_validation());
        assert!(!store.promotion(id).unwrap().unwrap().is_promoted());
    }

    #[tokio::test]
    async fn non_positive_duration_is_rejected() {
        let (manager, store, _, id) = setup();
        let err = manager.promote(id, "basic", Duration::zero()).await.unwrap_err();
        assert_eq!(err, LifecycleError::Invalid(PromotionError::InvalidDuration));
        assert!(!store.promotion(id).unwrap().unwrap().is_promoted());
    }

    #[tokio::test]
    async fn unknown_listing_is_not_found() {
        let (manager, _, _, _) = setup();
        let other = ListingId::new();
        let err = manager.promote(other, "basic", Duration::days(1)).await.unwrap_err();
        assert_eq!(err, LifecycleError::ListingNotFound(other));
    }

    #[tokio::test]
    async fn repromote_resets_counters() {
        let (manager, _, clock, id) = setup();
        manager.promote(id, "basic", Duration::days(7)).await.unwrap();
        manager.record_click(id).await.unwrap();
        manager.record_impression(id).await.unwrap();

        clock.advance(Duration::days(1));
        let p = manager.promote(id, "premium", Duration::days(3)).await.unwrap();
        assert_eq!((p.impressions(), p.clicks()), (0, 0));
        assert_eq!(p.expires_at(), Some(t0() + Duration::days(4)));
    }

    #[tokio::test]
    async fn engagement_ignored_when_not_promoted() {
        let (manager, _, _, id) = setup();
        assert!(!manager.record_impression(id).await.unwrap());
        assert_eq!(manager.get(id).await.unwrap().unwrap().impressions(), 0);
    }

    #[tokio::test]
    async fn sweep_uses_manager_clock() {
        let (manager, _, clock, id) = setup();
        manager.promote(id, "basic", Duration::hours(2)).await.unwrap();

        assert_eq!(manager.sweep_expired_now().await.unwrap().count(), 0);
        clock.advance(Duration::hours(2));
        let report = manager.sweep_expired_now().await.unwrap();
        assert_eq!(report.expired, vec![id]);
    }
}
