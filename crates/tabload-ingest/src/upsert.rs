//! Upsert engine
//!
//! Insert-or-update of a whole [`RowBatch`] keyed on its conflict columns.
//! Matching rows are replaced in full, never merged field by field.

use std::collections::HashMap;
use tracing::debug;

use crate::model::{Key, RowBatch, Value};
use crate::store::{Store, StoreError, StoreResult};

pub struct UpsertEngine<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> UpsertEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Upsert `batch`, returning the number of rows inserted or updated.
    ///
    /// An empty batch returns 0 without touching the store. Values are
    /// normalized first and rows repeating a conflict key collapse to the
    /// last one, so each key is written once.
    pub async fn upsert(&self, batch: &RowBatch, conflict_columns: &[&str]) -> StoreResult<u64> {
        if batch.is_empty() {
            debug!(entity = %batch.entity(), "Empty batch, nothing to upsert");
            return Ok(0);
        }

        let key_indexes = conflict_column_indexes(batch, conflict_columns)?;
        let prepared = collapse_duplicates(batch, &key_indexes);
        if prepared.len() < batch.len() {
            debug!(
                entity = %batch.entity(),
                incoming = batch.len(),
                distinct = prepared.len(),
                "Collapsed rows sharing a conflict key"
            );
        }

        self.store.upsert(&prepared, conflict_columns).await
    }
}

fn conflict_column_indexes(batch: &RowBatch, conflict_columns: &[&str]) -> StoreResult<Vec<usize>> {
    if conflict_columns.is_empty() {
        return Err(StoreError::invalid_batch(batch.entity(), "no conflict columns given"));
    }

    conflict_columns
        .iter()
        .map(|column| {
            batch.column_index(column).ok_or_else(|| {
                StoreError::invalid_batch(
                    batch.entity(),
                    format!("conflict column '{}' is not part of the batch", column),
                )
            })
        })
        .collect()
}

/// Normalized copy of `batch` with one row per conflict key; the last
/// occurrence wins and keeps the position of the first
fn collapse_duplicates(batch: &RowBatch, key_indexes: &[usize]) -> RowBatch {
    let mut rows: Vec<Vec<Value>> = Vec::with_capacity(batch.len());
    let mut positions: HashMap<Vec<Key>, usize> = HashMap::new();

    for row in batch.rows() {
        let row: Vec<Value> = row.iter().cloned().map(Value::normalized).collect();
        let key: Option<Vec<Key>> = key_indexes.iter().map(|&i| row[i].as_key()).collect();

        match key {
            Some(key) => match positions.get(&key) {
                Some(&position) => rows[position] = row,
                None => {
                    positions.insert(key, rows.len());
                    rows.push(row);
                },
            },
            // The store rejects a null key; pass the row through untouched
            None => rows.push(row),
        }
    }

    let mut prepared = batch.clone();
    prepared.replace_rows(rows);
    prepared
}
