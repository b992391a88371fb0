//! External category provider seam.
//!
//! The provider owns the public category directory. It is reached over an
//! unreliable channel, so every call can fail transiently, and the ids it hands
//! out are not stable across passes.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use shopfront_core::TenantId;
use shopfront_taxonomy::ProviderCategoryRecord;

use crate::retry::Retryable;

pub mod http;
pub mod ids;
pub mod in_memory;

pub use http::HttpCategoryProvider;
pub use ids::{IdGenerator, SequentialIdGenerator, UuidIdGenerator};
pub use in_memory::{InMemoryCategoryProvider, ProviderCall, ProviderOp};

/// Failures reported by a category provider.
///
/// `Unavailable`, `Timeout` and `Network` are transient; the rest are not worth
/// retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("category provider unavailable: {message}")]
    Unavailable { message: String },

    #[error("category provider timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    #[error("network error talking to category provider: {message}")]
    Network { message: String },

    #[error("category provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("category provider refused credentials")]
    Unauthorized,

    #[error("could not decode category provider response: {message}")]
    Decode { message: String },

    /// The request could not be built or followed, e.g. a malformed header.
    #[error("invalid request to category provider: {message}")]
    InvalidRequest { message: String },
}

impl ProviderError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout { .. } | Self::Network { .. }
        )
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Stable code for logs and reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "PROVIDER_UNAVAILABLE",
            Self::Timeout { .. } => "PROVIDER_TIMEOUT",
            Self::Network { .. } => "PROVIDER_NETWORK",
            Self::Rejected { .. } => "PROVIDER_REJECTED",
            Self::Unauthorized => "PROVIDER_UNAUTHORIZED",
            Self::Decode { .. } => "PROVIDER_DECODE",
            Self::InvalidRequest { .. } => "PROVIDER_INVALID_REQUEST",
        }
    }
}

impl Retryable for ProviderError {
    fn is_transient(&self) -> bool {
        ProviderError::is_transient(self)
    }
}

/// Remote category directory, partitioned by tenant scope.
///
/// `create` of a slug that already exists and `delete` of a record that is
/// already gone must both succeed.
#[async_trait]
pub trait CategoryProvider: Send + Sync {
    async fn list(&self, scope: TenantId) -> Result<Vec<ProviderCategoryRecord>, ProviderError>;

    async fn create(&self, scope: TenantId, record: &ProviderCategoryRecord) -> Result<(), ProviderError>;

    /// Rename the display name of `from` to match `to`.
    async fn update(
        &self,
        scope: TenantId,
        from: &ProviderCategoryRecord,
        to: &ProviderCategoryRecord,
    ) -> Result<(), ProviderError>;

    async fn delete(&self, scope: TenantId, record: &ProviderCategoryRecord) -> Result<(), ProviderError>;
}

#[async_trait]
impl<P: CategoryProvider + ?Sized> CategoryProvider for Arc<P> {
    async fn list(&self, scope: TenantId) -> Result<Vec<ProviderCategoryRecord>, ProviderError> {
        (**self).list(scope).await
    }

    async fn create(&self, scope: TenantId, record: &ProviderCategoryRecord) -> Result<(), ProviderError> {
        (**self).create(scope, record).await
    }

    async fn update(
        &self,
        scope: TenantId,
        from: &ProviderCategoryRecord,
        to: &ProviderCategoryRecord,
    ) -> Result<(), ProviderError> {
        (**self).update(scope, from, to).await
    }

    async fn delete(&self, scope: TenantId, record: &ProviderCategoryRecord) -> Result<(), ProviderError> {
        (**self).delete(scope, record).await
    }
}
