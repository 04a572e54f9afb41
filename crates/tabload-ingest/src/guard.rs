//! Referential integrity guard
//!
//! Checked before a dependent batch is written: every foreign-key value the
//! batch carries must already exist in the parent table.

use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::model::{EntityType, Key, RowBatch};
use crate::store::Store;

/// A batch column that must reference an existing parent row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub parent: EntityType,
}

impl ForeignKey {
    pub const fn new(column: &'static str, parent: EntityType) -> Self {
        Self { column, parent }
    }
}

pub struct ForeignKeyGuard<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> ForeignKeyGuard<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Fail with every missing parent id when `batch` references rows that
    /// do not exist. Absent values are not checked.
    pub async fn check(&self, batch: &RowBatch, foreign_key: &ForeignKey) -> Result<(), LoadError> {
        let entity = batch.entity();
        let required: BTreeSet<i64> = batch
            .column_values(foreign_key.column)
            .filter_map(|v| v.as_int())
            .collect();

        if required.is_empty() {
            return Ok(());
        }

        let present: BTreeSet<i64> = self
            .store
            .select_identities(foreign_key.parent, "id")
            .await
            .map_err(|source| LoadError::Store { entity, source })?
            .into_iter()
            .filter_map(|(key, id)| match key {
                Key::Int(_) => Some(id),
                Key::Text(_) => None,
            })
            .collect();

        let missing: BTreeSet<i64> = required.difference(&present).copied().collect();
        if !missing.is_empty() {
            warn!(
                entity = %entity,
                column = foreign_key.column,
                parent = %foreign_key.parent,
                missing = missing.len(),
                "Batch references missing parent rows"
            );
            return Err(LoadError::ReferentialIntegrity {
                entity,
                column: foreign_key.column,
                parent: foreign_key.parent,
                missing,
            });
        }

        debug!(
            entity = %entity,
            column = foreign_key.column,
            checked = required.len(),
            "Foreign keys verified"
        );
        Ok(())
    }

    /// Run [`check`](Self::check) for each key in order, stopping at the first failure
    pub async fn check_all(&self, batch: &RowBatch, foreign_keys: &[ForeignKey]) -> Result<(), LoadError> {
        for foreign_key in foreign_keys {
            self.check(batch, foreign_key).await?;
        }
        Ok(())
    }
}
