use serde::{Deserialize, Serialize};

use shopfront_core::{DomainError, DomainResult, TenantId};

/// Normalized category slug: trimmed and case-folded.
///
/// Two slugs that differ only in case or surrounding whitespace are the same slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CategorySlug(String);

impl CategorySlug {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(DomainError::validation("category slug cannot be empty"));
        }
        if normalized.chars().any(char::is_control) {
            return Err(DomainError::validation(format!(
                "category slug contains control characters: {raw:?}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CategorySlug {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CategorySlug {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CategorySlug> for String {
    fn from(value: CategorySlug) -> Self {
        value.0
    }
}

/// A tenant-owned category in the internal taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub tenant_scope: TenantId,
    pub slug: CategorySlug,
    pub name: String,
    pub active: bool,
}

impl Category {
    /// Build an active category, normalizing the slug and trimming the name.
    pub fn new(tenant_scope: TenantId, slug: &str, name: &str) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("category name cannot be empty"));
        }
        Ok(Self {
            tenant_scope,
            slug: CategorySlug::parse(slug)?,
            name: name.to_string(),
            active: true,
        })
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A category as reported by the external directory for one pass.
///
/// `external_id` is opaque: it may be missing or regenerated between passes and
/// is only ever handed back to the provider, never used for matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderCategoryRecord {
    pub external_id: Option<String>,
    pub slug: String,
    pub name: String,
}

impl ProviderCategoryRecord {
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            external_id: None,
            slug: slug.into(),
            name: name.into(),
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    /// Matching key for this record.
    pub fn key(&self) -> DomainResult<CategorySlug> {
        CategorySlug::parse(&self.slug)
    }

    /// The record the provider should hold for a desired category.
    pub fn desired(category: &Category) -> Self {
        Self::new(category.slug.as_str(), category.name.clone())
    }
}
