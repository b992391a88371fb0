//! Slug-keyed diff between desired categories and provider-reported records.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::category::{Category, CategorySlug, ProviderCategoryRecord};

/// A display-name change for a slug present on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryUpdate {
    pub slug: CategorySlug,
    pub from: ProviderCategoryRecord,
    pub to: ProviderCategoryRecord,
}

/// The minimal set of provider calls that makes the provider match the desired taxonomy.
///
/// Every list is ordered by slug so repeated plans over the same inputs are identical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPlan {
    pub creates: Vec<ProviderCategoryRecord>,
    pub updates: Vec<CategoryUpdate>,
    pub deletes: Vec<ProviderCategoryRecord>,
    /// Extra provider records sharing a slug with an earlier one. Removing them
    /// does not change which slugs the provider holds.
    pub duplicates: Vec<ProviderCategoryRecord>,
    /// Slugs present on both sides with the same display name.
    pub unchanged: Vec<CategorySlug>,
    /// Provider records whose slug does not normalize; left alone.
    pub ignored: Vec<ProviderCategoryRecord>,
}

impl CategoryPlan {
    /// True when no provider call is needed.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty() && self.duplicates.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len() + self.duplicates.len()
    }
}

/// Diff `desired` against `current`, keyed by normalized slug only.
///
/// - Inactive desired categories count as not desired.
/// - The first desired category wins when two normalize to the same slug.
/// - When the provider reports the same slug more than once, the first record is
///   matched and the rest go to `duplicates`.
/// - `external_id` never takes part in matching.
pub fn plan_changes<'a, D, C>(desired: D, current: C) -> CategoryPlan
where
    D: IntoIterator<Item = &'a Category>,
    C: IntoIterator<Item = ProviderCategoryRecord>,
{
    let mut wanted: BTreeMap<CategorySlug, &Category> = BTreeMap::new();
    for category in desired {
        if !category.active {
            continue;
        }
        wanted.entry(category.slug.clone()).or_insert(category);
    }

    let mut plan = CategoryPlan::default();
    let mut reported: BTreeMap<CategorySlug, ProviderCategoryRecord> = BTreeMap::new();

    for record in current {
        match record.key() {
            Ok(key) => match reported.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(_) => plan.duplicates.push(record),
            },
            Err(_) => plan.ignored.push(record),
        }
    }

    for (slug, category) in &wanted {
        match reported.get(slug) {
            None => plan.creates.push(ProviderCategoryRecord::desired(category)),
            Some(existing) if existing.name != category.name => {
                plan.updates.push(CategoryUpdate {
                    slug: slug.clone(),
                    from: existing.clone(),
                    to: ProviderCategoryRecord {
                        external_id: existing.external_id.clone(),
                        slug: slug.as_str().to_string(),
                        name: category.name.clone(),
                    },
                });
            }
            Some(_) => plan.unchanged.push(slug.clone()),
        }
    }

    for (slug, record) in reported {
        if !wanted.contains_key(&slug) {
            plan.deletes.push(record);
        }
    }

    plan.duplicates
        .sort_by(|a, b| a.slug.to_lowercase().cmp(&b.slug.to_lowercase()));

    plan
}
