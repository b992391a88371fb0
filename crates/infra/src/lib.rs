//! Infrastructure layer: provider clients, persistence, and the services that
//! keep the public directory in step with tenant data.

pub mod config;
pub mod materializer;
pub mod promotions;
pub mod provider;
pub mod reconciler;
pub mod retry;
pub mod store;

pub use config::{ConfigError, DirectoryConfig, ProviderConfig, ShopfrontConfig};
pub use materializer::{DirectoryMaterializer, MaterializeError, RefreshOutcome};
pub use promotions::{LifecycleError, PromotionLifecycleManager, SweepReport};
pub use provider::{
    CategoryProvider, HttpCategoryProvider, IdGenerator, InMemoryCategoryProvider, ProviderCall,
    ProviderError, ProviderOp, SequentialIdGenerator, UuidIdGenerator,
};
pub use reconciler::{CategoryReconciler, ReconcileError, ReconcileFailure, ReconcileOp, ReconcileResult};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{
    CategoryStore, DirectorySource, InMemoryCatalogStore, PostgresCatalogStore, PromotionStore, StoreError,
};
