//! Natural-key resolution
//!
//! Dependent rows name their parent by a business value (a supplier name, a
//! payment method). The resolver registers those values in the parent table
//! and reads the `value -> id` mapping back from the store on every run.
//! Nothing is cached across runs.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::error::LoadError;
use crate::model::{EntityType, Key, RowBatch, Value};
use crate::store::{Store, StoreResult};
use crate::upsert::UpsertEngine;

/// A source field naming a row of another table by its natural key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NaturalKeyRef {
    /// Field on the dependent source rows
    pub field: &'static str,
    /// Table the values identify
    pub entity: EntityType,
    /// Unique column of `entity` holding the value
    pub key_column: &'static str,
}

impl NaturalKeyRef {
    pub const SUPPLIER: NaturalKeyRef = NaturalKeyRef {
        field: "supplier",
        entity: EntityType::Suppliers,
        key_column: "name",
    };

    pub const PAYMENT_METHOD: NaturalKeyRef = NaturalKeyRef {
        field: "payment_method",
        entity: EntityType::PaymentMethods,
        key_column: "method",
    };
}

/// Distinct present values, in order of first appearance
pub fn distinct_keys<'v>(values: impl IntoIterator<Item = Option<&'v str>>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .flatten()
        .filter(|v| seen.insert(*v))
        .map(str::to_string)
        .collect()
}

/// Natural-key value to surrogate id, as read from the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMap {
    ids: HashMap<String, i64>,
}

impl KeyMap {
    pub fn get(&self, key: &str) -> Option<i64> {
        self.ids.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Map every value of `reference.field` on `dependent` rows to its id.
    ///
    /// Absent values stay absent. Any present value without an id fails the
    /// whole batch, naming every such value.
    pub fn resolve_all<'v>(
        &self,
        dependent: EntityType,
        reference: &NaturalKeyRef,
        values: impl IntoIterator<Item = Option<&'v str>>,
    ) -> Result<Vec<Option<i64>>, LoadError> {
        let mut missing = BTreeSet::new();
        let resolved: Vec<Option<i64>> = values
            .into_iter()
            .map(|value| {
                value.and_then(|v| {
                    let id = self.get(v);
                    if id.is_none() {
                        missing.insert(Key::Text(v.to_string()));
                    }
                    id
                })
            })
            .collect();

        if !missing.is_empty() {
            return Err(LoadError::Resolution {
                entity: dependent,
                field: reference.field,
                missing,
            });
        }

        Ok(resolved)
    }
}

impl FromIterator<(String, i64)> for KeyMap {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

pub struct NaturalKeyResolver<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> NaturalKeyResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Batch of parent rows holding only the natural key
    pub fn key_batch(reference: &NaturalKeyRef, keys: &[String]) -> RowBatch {
        let mut batch = RowBatch::new(reference.entity, vec![reference.key_column]);
        batch.replace_rows(keys.iter().map(|k| vec![Value::Text(k.clone())]).collect());
        batch
    }

    /// Upsert `keys` into the parent table; existing ids are kept
    pub async fn register(&self, reference: &NaturalKeyRef, keys: &[String]) -> StoreResult<u64> {
        let batch = Self::key_batch(reference, keys);
        let affected = UpsertEngine::new(self.store)
            .upsert(&batch, &[reference.key_column])
            .await?;

        debug!(entity = %reference.entity, keys = keys.len(), "Registered natural keys");
        Ok(affected)
    }

    /// Read the current `natural key -> id` mapping of the parent table
    pub async fn key_map(&self, reference: &NaturalKeyRef) -> StoreResult<KeyMap> {
        let identities = self
            .store
            .select_identities(reference.entity, reference.key_column)
            .await?;

        let map: KeyMap = identities
            .into_iter()
            .filter_map(|(key, id)| match key {
                Key::Text(value) => Some((value, id)),
                Key::Int(_) => None,
            })
            .collect();

        debug!(entity = %reference.entity, keys = map.len(), "Loaded natural key map");
        Ok(map)
    }
}
