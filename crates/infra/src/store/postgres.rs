//! Postgres-backed catalog store.
//!
//! Schema lives in `migrations/0001_directory.sql` and can be applied with
//! [`PostgresCatalogStore::ensure_schema`].
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (check constraint violation) | `23514` | `InvalidRow` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | Other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};

use shopfront_core::{ItemId, ListingId, TenantId};
use shopfront_directory::{
    DirectoryInputs, EngagementCounter, GeoPoint, InventoryItemRecord, Listing, LocationStatus,
    Promotion, PromotionRecord,
};
use shopfront_taxonomy::{Category, CategorySlug};

use super::{CategoryStore, DirectorySource, PromotionStore, StoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_directory.sql");

/// Postgres-backed listings, inventory, categories and promotions.
///
/// Directory loads run in one `REPEATABLE READ` transaction so the four tables
/// are read from the same database snapshot.
#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: Arc<PgPool>,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the directory tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl DirectorySource for PostgresCatalogStore {
    #[instrument(skip(self), fields(listing_count, item_count), err)]
    async fn load_directory_inputs(&self) -> Result<DirectoryInputs, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_load", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let listing_rows = sqlx::query(
            r#"
            SELECT listing_id, tenant_id, display_name, address, lat, lon,
                   sync_enabled, last_sync_at, visible, location_status
            FROM directory_listings
            ORDER BY listing_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_listings", e))?;

        let item_rows = sqlx::query(
            r#"
            SELECT item_id, tenant_id, sku, name, category_slug, quantity, is_active, is_public
            FROM inventory_items
            ORDER BY item_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        let category_rows = sqlx::query(
            r#"
            SELECT tenant_id, slug, name, is_active
            FROM categories
            ORDER BY tenant_id, slug
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_categories", e))?;

        let promotion_rows = sqlx::query(
            r#"
            SELECT listing_id, is_promoted, tier, started_at, expires_at, impressions, clicks
            FROM listing_promotions
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_promotions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_load", e))?;

        let mut inputs = DirectoryInputs::default();
        for row in listing_rows {
            inputs.listings.push(decode::<ListingRow>(&row)?.try_into()?);
        }
        for row in item_rows {
            inputs.items.push(decode::<ItemRow>(&row)?.try_into()?);
        }
        for row in category_rows {
            inputs.categories.push(decode::<CategoryRow>(&row)?.try_into()?);
        }
        for row in promotion_rows {
            inputs.promotions.push(promotion_from_row(decode::<PromotionRow>(&row)?)?);
        }

        let span = Span::current();
        span.record("listing_count", inputs.listings.len());
        span.record("item_count", inputs.items.len());
        Ok(inputs)
    }
}

#[async_trait]
impl PromotionStore for PostgresCatalogStore {
    #[instrument(skip(self), fields(listing_id = %listing_id), err)]
    async fn load_promotion(&self, listing_id: ListingId) -> Result<Option<Promotion>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT l.listing_id,
                   COALESCE(p.is_promoted, FALSE) AS is_promoted,
                   p.tier,
                   p.started_at,
                   p.expires_at,
                   COALESCE(p.impressions, 0) AS impressions,
                   COALESCE(p.clicks, 0) AS clicks
            FROM directory_listings l
            LEFT JOIN listing_promotions p ON p.listing_id = l.listing_id
            WHERE l.listing_id = $1
            "#,
        )
        .bind(listing_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_promotion", e))?;

        row.map(|r| decode::<PromotionRow>(&r).and_then(promotion_from_row))
            .transpose()
    }

    #[instrument(skip(self, promotion), fields(listing_id = %promotion.listing_id()), err)]
    async fn save_promotion(&self, promotion: &Promotion) -> Result<(), StoreError> {
        let record = PromotionRecord::from(promotion.clone());
        sqlx::query(
            r#"
            INSERT INTO listing_promotions
                (listing_id, is_promoted, tier, started_at, expires_at, impressions, clicks)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (listing_id) DO UPDATE SET
                is_promoted = EXCLUDED.is_promoted,
                tier = EXCLUDED.tier,
                started_at = EXCLUDED.started_at,
                expires_at = EXCLUDED.expires_at,
                impressions = EXCLUDED.impressions,
                clicks = EXCLUDED.clicks
            "#,
        )
        .bind(record.listing_id.as_uuid())
        .bind(record.is_promoted)
        .bind(record.tier)
        .bind(record.started_at)
        .bind(record.expires_at)
        .bind(record.impressions)
        .bind(record.clicks)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_promotion", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(listing_id = %listing_id), err)]
    async fn increment_counter(
        &self,
        listing_id: ListingId,
        counter: EngagementCounter,
    ) -> Result<bool, StoreError> {
        let sql = match counter {
            EngagementCounter::Impressions => {
                "UPDATE listing_promotions SET impressions = impressions + 1 \
                 WHERE listing_id = $1 AND is_promoted"
            }
            EngagementCounter::Clicks => {
                "UPDATE listing_promotions SET clicks = clicks + 1 \
                 WHERE listing_id = $1 AND is_promoted"
            }
        };
        let result = sqlx::query(sql)
            .bind(listing_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("increment_counter", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(expired_count), err)]
    async fn expire_promotions(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_expire", e))?;

        let rows = sqlx::query(
            r#"
            UPDATE listing_promotions
            SET is_promoted = FALSE, tier = NULL, started_at = NULL, expires_at = NULL
            WHERE is_promoted AND expires_at IS NOT NULL AND expires_at <= $1
            RETURNING listing_id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("expire_promotions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_expire", e))?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in rows {
            let id: uuid::Uuid = row
                .try_get("listing_id")
                .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
            expired.push(ListingId::from_uuid(id));
        }
        expired.sort();

        Span::current().record("expired_count", expired.len());
        Ok(expired)
    }
}

#[async_trait]
impl CategoryStore for PostgresCatalogStore {
    #[instrument(skip(self), fields(scope = %scope), err)]
    async fn categories_for(&self, scope: TenantId) -> Result<Vec<Category>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, slug, name, is_active
            FROM categories
            WHERE tenant_id = $1
            ORDER BY slug
            "#,
        )
        .bind(scope.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("categories_for", e))?;

        rows.iter()
            .map(|row| -> Result<Category, StoreError> { decode::<CategoryRow>(row)?.try_into() })
            .collect()
    }

    #[instrument(skip(self, category), fields(scope = %category.tenant_scope, slug = %category.slug), err)]
    async fn upsert_category(&self, category: &Category) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO categories (tenant_id, slug, name, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, slug) DO UPDATE SET
                name = EXCLUDED.name,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(category.tenant_scope.as_uuid())
        .bind(category.slug.as_str())
        .bind(&category.name)
        .bind(category.active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_category", e))?;
        Ok(())
    }

    #[instrument(skip(self, slug), fields(scope = %scope, slug = %slug), err)]
    async fn remove_category(&self, scope: TenantId, slug: &CategorySlug) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM categories WHERE tenant_id = $1 AND slug = $2")
            .bind(scope.as_uuid())
            .bind(slug.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_category", e))?;
        Ok(result.rows_affected() > 0)
    }
}

fn decode<'r, T>(row: &'r sqlx::postgres::PgRow) -> Result<T, StoreError>
where
    T: FromRow<'r, sqlx::postgres::PgRow>,
{
    T::from_row(row).map_err(|e| StoreError::InvalidRow(e.to_string()))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23503") => StoreError::NotFound(msg),
                Some("23514") => StoreError::InvalidRow(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("database unavailable in {}: {}", operation, err))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct ListingRow {
    listing_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    display_name: String,
    address: String,
    lat: f64,
    lon: f64,
    sync_enabled: bool,
    last_sync_at: Option<DateTime<Utc>>,
    visible: bool,
    location_status: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ListingRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ListingRow {
            listing_id: row.try_get("listing_id")?,
            tenant_id: row.try_get("tenant_id")?,
            display_name: row.try_get("display_name")?,
            address: row.try_get("address")?,
            lat: row.try_get("lat")?,
            lon: row.try_get("lon")?,
            sync_enabled: row.try_get("sync_enabled")?,
            last_sync_at: row.try_get("last_sync_at")?,
            visible: row.try_get("visible")?,
            location_status: row.try_get("location_status")?,
        })
    }
}

fn parse_location_status(raw: &str) -> Result<LocationStatus, StoreError> {
    match raw {
        "active" => Ok(LocationStatus::Active),
        "pending" => Ok(LocationStatus::Pending),
        "suspended" => Ok(LocationStatus::Suspended),
        "closed" => Ok(LocationStatus::Closed),
        other => Err(StoreError::InvalidRow(format!("unknown location_status {other:?}"))),
    }
}

impl TryFrom<ListingRow> for Listing {
    type Error = StoreError;

    fn try_from(row: ListingRow) -> Result<Self, Self::Error> {
        let geo = GeoPoint::new(row.lat, row.lon).map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        Ok(Listing {
            listing_id: ListingId::from_uuid(row.listing_id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            display_name: row.display_name,
            address: row.address,
            geo,
            sync_enabled: row.sync_enabled,
            last_sync_at: row.last_sync_at,
            visible: row.visible,
            location_status: parse_location_status(&row.location_status)?,
        })
    }
}

#[derive(Debug)]
struct ItemRow {
    item_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    sku: String,
    name: String,
    category_slug: Option<String>,
    quantity: i64,
    is_active: bool,
    is_public: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            item_id: row.try_get("item_id")?,
            tenant_id: row.try_get("tenant_id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            category_slug: row.try_get("category_slug")?,
            quantity: row.try_get("quantity")?,
            is_active: row.try_get("is_active")?,
            is_public: row.try_get("is_public")?,
        })
    }
}

impl TryFrom<ItemRow> for InventoryItemRecord {
    type Error = StoreError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        let category = row
            .category_slug
            .as_deref()
            .map(CategorySlug::parse)
            .transpose()
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        Ok(InventoryItemRecord {
            item_id: ItemId::from_uuid(row.item_id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            sku: row.sku,
            name: row.name,
            category,
            quantity: row.quantity,
            active: row.is_active,
            public: row.is_public,
        })
    }
}

#[derive(Debug)]
struct CategoryRow {
    tenant_id: uuid::Uuid,
    slug: String,
    name: String,
    is_active: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for CategoryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(CategoryRow {
            tenant_id: row.try_get("tenant_id")?,
            slug: row.try_get("slug")?,
            name: row.try_get("name")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

impl TryFrom<CategoryRow> for Category {
    type Error = StoreError;

    fn try_from(row: CategoryRow) -> Result<Self, Self::Error> {
        let category = Category::new(TenantId::from_uuid(row.tenant_id), &row.slug, &row.name)
            .map_err(|e| StoreError::InvalidRow(e.to_string()))?;
        Ok(if row.is_active { category } else { category.deactivated() })
    }
}

#[derive(Debug)]
struct PromotionRow {
    listing_id: uuid::Uuid,
    is_promoted: bool,
    tier: Option<String>,
    started_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    impressions: i64,
    clicks: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for PromotionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(PromotionRow {
            listing_id: row.try_get("listing_id")?,
            is_promoted: row.try_get("is_promoted")?,
            tier: row.try_get("tier")?,
            started_at: row.try_get("started_at")?,
            expires_at: row.try_get("expires_at")?,
            impressions: row.try_get("impressions")?,
            clicks: row.try_get("clicks")?,
        })
    }
}

fn promotion_from_row(row: PromotionRow) -> Result<Promotion, StoreError> {
    let record = PromotionRecord {
        listing_id: ListingId::from_uuid(row.listing_id),
        is_promoted: row.is_promoted,
        tier: row.tier,
        started_at: row.started_at,
        expires_at: row.expires_at,
        impressions: row.impressions,
        clicks: row.clicks,
    };
    Promotion::try_from(record).map_err(|e| StoreError::InvalidRow(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn location_status_parses_known_values() {
        assert_eq!(parse_location_status("active").unwrap(), LocationStatus::Active);
        assert_eq!(parse_location_status("closed").unwrap(), LocationStatus::Closed);
        assert!(matches!(parse_location_status("gone"), Err(StoreError::InvalidRow(_))));
    }

    #[test]
    fn category_row_normalizes_and_keeps_inactive_flag() {
        let row = CategoryRow {
            tenant_id: uuid::Uuid::now_v7(),
            slug: " Tools ".to_string(),
            name: "Tools".to_string(),
            is_active: false,
        };
        let category = Category::try_from(row).unwrap();
        assert_eq!(category.slug.as_str(), "tools");
        assert!(!category.active);
    }

    #[test]
    fn promoted_row_without_tier_is_invalid() {
        let row = PromotionRow {
            listing_id: uuid::Uuid::now_v7(),
            is_promoted: true,
            tier: None,
            started_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            expires_at: None,
            impressions: 0,
            clicks: 0,
        };
        assert!(matches!(promotion_from_row(row), Err(StoreError::InvalidRow(_))));
    }

    #[test]
    fn listing_row_with_bad_coordinates_is_invalid() {
        let row = ListingRow {
            listing_id: uuid::Uuid::now_v7(),
            tenant_id: uuid::Uuid::now_v7(),
            display_name: "x".to_string(),
            address: "y".to_string(),
            lat: 123.0,
            lon: 0.0,
            sync_enabled: true,
            last_sync_at: None,
            visible: true,
            location_status: "active".to_string(),
        };
        assert!(Listing::try_from(row).is_err());
    }
}
