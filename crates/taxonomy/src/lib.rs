//! Category taxonomy domain.
//!
//! Slug normalization and the pure diff between a tenant's desired taxonomy and
//! what the external category directory currently reports (no IO).

pub mod category;
pub mod plan;

pub use category::{Category, CategorySlug, ProviderCategoryRecord};
pub use plan::{CategoryPlan, CategoryUpdate, plan_changes};
