//! In-memory category provider.
//!
//! Behaves like the remote directory (opaque ids, idempotent create/delete) and
//! adds a call journal plus scripted failures so reconciliation can be exercised
//! without a network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use shopfront_core::TenantId;
use shopfront_taxonomy::{CategorySlug, ProviderCategoryRecord};

use super::ids::{IdGenerator, SequentialIdGenerator};
use super::{CategoryProvider, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    List,
    Create,
    Update,
    Delete,
}

/// One call received by the provider, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub scope: TenantId,
    pub op: ProviderOp,
    /// Normalized slug the call targeted; `None` for `List`.
    pub slug: Option<String>,
}

#[derive(Debug)]
struct Fault {
    op: ProviderOp,
    slug: Option<String>,
    error: ProviderError,
    remaining: u32,
}

pub struct InMemoryCategoryProvider {
    scopes: RwLock<HashMap<TenantId, Vec<ProviderCategoryRecord>>>,
    ids: Arc<dyn IdGenerator>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl Default for InMemoryCategoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCategoryProvider {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(SequentialIdGenerator::new("cat")))
    }

    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            ids,
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replace the records held for `scope`. Records without an id get one.
    pub fn seed(&self, scope: TenantId, records: impl IntoIterator<Item = ProviderCategoryRecord>) {
        let records = records
            .into_iter()
            .map(|mut r| {
                if r.external_id.is_none() {
                    r.external_id = Some(self.ids.next_id());
                }
                r
            })
            .collect();
        self.write_scopes().insert(scope, records);
    }

    pub fn records(&self, scope: TenantId) -> Vec<ProviderCategoryRecord> {
        self.read_scopes().get(&scope).cloned().unwrap_or_default()
    }

    /// Hand out fresh ids for every record in `scope`, as the remote side may do
    /// between passes.
    pub fn regenerate_ids(&self, scope: TenantId) {
        if let Some(records) = self.write_scopes().get_mut(&scope) {
            for record in records.iter_mut() {
                record.external_id = Some(self.ids.next_id());
            }
        }
    }

    /// Fail the next `times` calls of `op` with `error`.
    ///
    /// With a slug, only calls targeting that (normalized) slug fail.
    pub fn fail_on(&self, op: ProviderOp, slug: Option<&str>, error: ProviderError, times: u32) {
        self.lock_faults().push(Fault {
            op,
            slug: slug.map(normalize),
            error,
            remaining: times,
        });
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_of(&self, op: ProviderOp) -> Vec<ProviderCall> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn enter(&self, scope: TenantId, op: ProviderOp, slug: Option<String>) -> Result<(), ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ProviderCall {
                scope,
                op,
                slug: slug.clone(),
            });

        let mut faults = self.lock_faults();
        let hit = faults.iter_mut().find(|f| {
            f.op == op && f.remaining > 0 && (f.slug.is_none() || f.slug == slug)
        });
        match hit {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }

    fn read_scopes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TenantId, Vec<ProviderCategoryRecord>>> {
        self.scopes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_scopes(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TenantId, Vec<ProviderCategoryRecord>>> {
        self.scopes.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Vec<Fault>> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn normalize(raw: &str) -> String {
    CategorySlug::parse(raw)
        .map(String::from)
        .unwrap_or_else(|_| raw.to_string())
}

/// Index of the record `target` refers to: by id when it carries one that is
/// still known, otherwise by normalized slug.
fn locate(records: &[ProviderCategoryRecord], target: &ProviderCategoryRecord) -> Option<usize> {
    if let Some(id) = &target.external_id {
        if let Some(idx) = records.iter().position(|r| r.external_id.as_ref() == Some(id)) {
            return Some(idx);
        }
    }
    let slug = normalize(&target.slug);
    records.iter().position(|r| normalize(&r.slug) == slug)
}

#[async_trait]
impl CategoryProvider for InMemoryCategoryProvider {
    async fn list(&self, scope: TenantId) -> Result<Vec<ProviderCategoryRecord>, ProviderError> {
        self.enter(scope, ProviderOp::List, None)?;
        Ok(self.records(scope))
    }

    async fn create(&self, scope: TenantId, record: &ProviderCategoryRecord) -> Result<(), ProviderError> {
        let slug = normalize(&record.slug);
        self.enter(scope, ProviderOp::Create, Some(slug.clone()))?;

        let mut scopes = self.write_scopes();
        let records = scopes.entry(scope).or_default();
        if records.iter().any(|r| normalize(&r.slug) == slug) {
            return Ok(());
        }
        records.push(ProviderCategoryRecord {
            external_id: Some(self.ids.next_id()),
            slug,
            name: record.name.clone(),
        });
        Ok(())
    }

    async fn update(
        &self,
        scope: TenantId,
        from: &ProviderCategoryRecord,
        to: &ProviderCategoryRecord,
    ) -> Result<(), ProviderError> {
        self.enter(scope, ProviderOp::Update, Some(normalize(&from.slug)))?;

        let mut scopes = self.write_scopes();
        let records = scopes.entry(scope).or_default();
        match locate(records, from) {
            Some(idx) => {
                records[idx].name = to.name.clone();
                Ok(())
            }
            None => Err(ProviderError::rejected(404, format!("no category {:?}", from.slug))),
        }
    }

    async fn delete(&self, scope: TenantId, record: &ProviderCategoryRecord) -> Result<(), ProviderError> {
        self.enter(scope, ProviderOp::Delete, Some(normalize(&record.slug)))?;

        let mut scopes = self.write_scopes();
        if let Some(records) = scopes.get_mut(&scope) {
            if let Some(idx) = locate(records, record) {
                records.remove(idx);
            }
        }
        Ok(())
    }
}
