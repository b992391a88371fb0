//! Category reconciliation against the external provider.
//!
//! One pass: list what the provider holds for a scope, plan the minimal change
//! set by normalized slug, then apply creates, updates and deletes in that order.
//! Creates run before deletes so a rename never leaves the slug set emptier than
//! it started. Extra provider records that repeat a slug are removed last. A
//! failing call is recorded and the pass continues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use shopfront_core::TenantId;
use shopfront_taxonomy::{Category, CategorySlug, ProviderCategoryRecord, plan_changes};

use crate::provider::{CategoryProvider, ProviderError};
use crate::retry::{RetryOutcome, RetryPolicy, retry_transient};
use crate::store::{CategoryStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOp {
    Create,
    Update,
    Delete,
    /// Removal of a provider record that repeats an already matched slug.
    Deduplicate,
}

impl ReconcileOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Deduplicate => "deduplicate",
        }
    }
}

/// A provider call that did not succeed within the retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileFailure {
    pub slug: CategorySlug,
    pub operation: ReconcileOp,
    pub error: ProviderError,
    pub attempts: u32,
}

impl ReconcileFailure {
    /// Whether a later pass could reasonably succeed.
    pub fn is_transient(&self) -> bool {
        self.error.is_transient()
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub created: Vec<CategorySlug>,
    pub updated: Vec<CategorySlug>,
    pub deleted: Vec<CategorySlug>,
    /// Slugs whose repeated provider records were removed. The slug itself is kept.
    pub deduplicated: Vec<CategorySlug>,
    pub failed: Vec<ReconcileFailure>,
    pub unchanged: usize,
}

impl ReconcileResult {
    /// No call failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Nothing needed changing and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.is_clean()
            && self.created.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.deduplicated.is_empty()
    }

    /// Slugs left out of sync with the desired taxonomy.
    ///
    /// A failed deduplication leaves an extra record behind but the slug itself
    /// is in sync, so it is not listed here.
    pub fn failed_slugs(&self) -> Vec<&CategorySlug> {
        self.failed
            .iter()
            .filter(|f| f.operation != ReconcileOp::Deduplicate)
            .map(|f| &f.slug)
            .collect()
    }

    fn record<T>(&mut self, op: ReconcileOp, slug: CategorySlug, outcome: RetryOutcome<T, ProviderError>) {
        match outcome.result {
            Ok(_) => match op {
                ReconcileOp::Create => self.created.push(slug),
                ReconcileOp::Update => self.updated.push(slug),
                ReconcileOp::Delete => self.deleted.push(slug),
                ReconcileOp::Deduplicate => self.deduplicated.push(slug),
            },
            Err(error) => {
                warn!(
                    operation = op.as_str(),
                    slug = %slug,
                    attempts = outcome.attempts,
                    error_code = error.error_code(),
                    error = %error,
                    "category change failed"
                );
                self.failed.push(ReconcileFailure {
                    slug,
                    operation: op,
                    error,
                    attempts: outcome.attempts,
                });
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("could not list provider categories for scope {scope} after {attempts} attempt(s): {source}")]
    ListFailed {
        scope: TenantId,
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("could not load desired categories for scope {scope}: {source}")]
    DesiredUnavailable {
        scope: TenantId,
        #[source]
        source: StoreError,
    },
}

/// Drives a [`CategoryProvider`] towards a tenant's desired taxonomy.
///
/// Passes for the same scope never overlap; passes for different scopes run
/// independently. A scope's lock entry is dropped once no pass holds or awaits it.
pub struct CategoryReconciler<P> {
    provider: P,
    retry: RetryPolicy,
    scope_locks: Mutex<HashMap<TenantId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<P: CategoryProvider> CategoryReconciler<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn scope_lock(&self, scope: TenantId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.scope_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(scope).or_default().clone()
    }

    fn release_scope_lock(&self, scope: TenantId, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.scope_locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(lock);
        if locks.get(&scope).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(&scope);
        }
    }

    /// Make the provider's categories for `scope` match `desired`.
    ///
    /// Categories belonging to another scope are skipped. Fails only when the
    /// provider's current state cannot be listed.
    #[instrument(skip_all, fields(scope = %scope, desired = desired.len()), err)]
    pub async fn reconcile(
        &self,
        scope: TenantId,
        desired: &[Category],
    ) -> Result<ReconcileResult, ReconcileError> {
        let lock = self.scope_lock(scope);
        let result = {
            let _guard = lock.lock().await;
            self.run_pass(scope, desired).await
        };
        self.release_scope_lock(scope, lock);
        result
    }

    async fn run_pass(&self, scope: TenantId, desired: &[Category]) -> Result<ReconcileResult, ReconcileError> {
        let (in_scope, foreign): (Vec<&Category>, Vec<&Category>) =
            desired.iter().partition(|c| c.tenant_scope == scope);
        if !foreign.is_empty() {
            warn!(skipped = foreign.len(), "ignoring categories owned by another scope");
        }

        let listed = retry_transient(&self.retry, "list", || self.provider.list(scope)).await;
        let current = listed.result.map_err(|source| ReconcileError::ListFailed {
            scope,
            attempts: listed.attempts,
            source,
        })?;

        let plan = plan_changes(in_scope, current);
        for record in &plan.ignored {
            warn!(slug = ?record.slug, "provider record has an unusable slug, leaving it alone");
        }

        let mut result = ReconcileResult {
            unchanged: plan.unchanged.len(),
            ..ReconcileResult::default()
        };

        for record in &plan.creates {
            let Some(slug) = slug_of(record) else { continue };
            let outcome = retry_transient(&self.retry, "create", || self.provider.create(scope, record)).await;
            result.record(ReconcileOp::Create, slug, outcome);
        }

        for update in &plan.updates {
            let outcome = retry_transient(&self.retry, "update", || {
                self.provider.update(scope, &update.from, &update.to)
            })
            .await;
            result.record(ReconcileOp::Update, update.slug.clone(), outcome);
        }

        for record in &plan.deletes {
            let Some(slug) = slug_of(record) else { continue };
            let outcome = retry_transient(&self.retry, "delete", || self.provider.delete(scope, record)).await;
            result.record(ReconcileOp::Delete, slug, outcome);
        }

        for record in &plan.duplicates {
            let Some(slug) = slug_of(record) else { continue };
            let outcome = retry_transient(&self.retry, "deduplicate", || self.provider.delete(scope, record)).await;
            result.record(ReconcileOp::Deduplicate, slug, outcome);
        }

        info!(
            created = result.created.len(),
            updated = result.updated.len(),
            deleted = result.deleted.len(),
            deduplicated = result.deduplicated.len(),
            unchanged = result.unchanged,
            failed = result.failed.len(),
            "category reconciliation finished"
        );
        Ok(result)
    }

    /// Reconcile `scope` against the taxonomy currently held in `store`.
    pub async fn reconcile_stored<C>(&self, scope: TenantId, store: &C) -> Result<ReconcileResult, ReconcileError>
    where
        C: CategoryStore + ?Sized,
    {
        let desired = store
            .categories_for(scope)
            .await
            .map_err(|source| ReconcileError::DesiredUnavailable { scope, source })?;
        self.reconcile(scope, &desired).await
    }
}

fn slug_of(record: &ProviderCategoryRecord) -> Option<CategorySlug> {
    record.key().ok()
}
