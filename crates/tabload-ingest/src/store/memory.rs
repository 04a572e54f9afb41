//! In-process store
//!
//! Mirrors the PostgreSQL schema's behaviour closely enough for the pipeline
//! to be exercised without a database: unique conflict targets, NOT NULL and
//! foreign-key checks, store-assigned ids, and all-or-nothing batches.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{Store, StoreError, StoreResult};
use crate::audit::{AuditEntry, LoadStatus};
use crate::model::{EntityType, Key, RowBatch, Value};
use crate::schema::{self, Identity, TableDef};

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<EntityType, MemTable>,
    audit: Vec<AuditEntry>,
}

#[derive(Debug, Default, Clone)]
struct MemTable {
    rows: Vec<StoredRow>,
    last_id: i64,
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: i64,
    values: BTreeMap<&'static str, Value>,
}

impl MemoryState {
    fn ids(&self, entity: EntityType) -> HashSet<i64> {
        self.tables
            .get(&entity)
            .map(|t| t.rows.iter().map(|r| r.id).collect())
            .unwrap_or_default()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("memory store lock poisoned: {}", e)))
    }

    fn snapshot(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stored rows of `entity` including their `id`, ordered by insertion
    pub fn rows(&self, entity: EntityType) -> Vec<BTreeMap<String, Value>> {
        let state = self.snapshot();
        state
            .tables
            .get(&entity)
            .map(|table| {
                table
                    .rows
                    .iter()
                    .map(|row| {
                        let mut out: BTreeMap<String, Value> = row
                            .values
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.clone()))
                            .collect();
                        out.insert("id".to_string(), Value::Int(row.id));
                        out
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn row_count(&self, entity: EntityType) -> usize {
        self.snapshot()
            .tables
            .get(&entity)
            .map_or(0, |t| t.rows.len())
    }

    /// Every audit entry, oldest first
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.snapshot().audit.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert(&self, batch: &RowBatch, conflict_columns: &[&str]) -> StoreResult<u64> {
        let entity = batch.entity();
        let def = schema::table(entity);
        validate_batch(def, batch, conflict_columns)?;

        let mut state = self.lock()?;

        // Work on a copy; it replaces the live table only if every row passes.
        let mut table = state.tables.get(&entity).cloned().unwrap_or_default();
        let mut index: HashMap<Vec<Key>, usize> = table
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| conflict_key(&row.values, conflict_columns).map(|k| (k, i)))
            .collect();
        let mut touched = HashSet::new();

        for row in batch.rows() {
            let values: BTreeMap<&'static str, Value> = def
                .columns
                .iter()
                .map(|column| {
                    let value = batch
                        .column_index(column.name)
                        .and_then(|i| row.get(i).cloned())
                        .unwrap_or(Value::Absent);
                    (column.name, value)
                })
                .collect();

            check_row(&state, def, &values)?;

            let key = conflict_key(&values, conflict_columns).ok_or_else(|| {
                StoreError::constraint(entity, "null value in conflict column")
            })?;
            if !touched.insert(key.clone()) {
                return Err(StoreError::constraint(
                    entity,
                    format!("batch affects conflict key {:?} more than once", key),
                ));
            }

            match index.get(&key) {
                Some(&position) => table.rows[position].values = values,
                None => {
                    let id = match def.identity {
                        Identity::Source => values
                            .get("id")
                            .and_then(Value::as_int)
                            .ok_or_else(|| StoreError::constraint(entity, "missing id"))?,
                        Identity::Generated => {
                            table.last_id += 1;
                            table.last_id
                        },
                    };
                    index.insert(key, table.rows.len());
                    table.rows.push(StoredRow { id, values });
                },
            }
        }

        state.tables.insert(entity, table);
        Ok(batch.len() as u64)
    }

    async fn select_identities(
        &self,
        entity: EntityType,
        key_column: &str,
    ) -> StoreResult<Vec<(Key, i64)>> {
        let def = schema::table(entity);
        if def.key_kind(key_column).is_none() {
            return Err(StoreError::unknown_column(entity, key_column));
        }

        let state = self.lock()?;
        let identities = state
            .tables
            .get(&entity)
            .map(|table| {
                table
                    .rows
                    .iter()
                    .filter_map(|row| {
                        let key = if key_column == "id" {
                            Some(Key::Int(row.id))
                        } else {
                            row.values.get(key_column).and_then(Value::as_key)
                        };
                        key.map(|k| (k, row.id))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(identities)
    }

    async fn insert_audit(
        &self,
        entity: EntityType,
        row_count: u64,
        status: LoadStatus,
    ) -> StoreResult<AuditEntry> {
        let mut state = self.lock()?;
        let entry = AuditEntry {
            id: state.audit.len() as i64 + 1,
            load_timestamp: Utc::now(),
            table_name: entity.table_name().to_string(),
            row_count: i64::try_from(row_count).unwrap_or(i64::MAX),
            status: status.as_str().to_string(),
        };
        state.audit.push(entry.clone());
        Ok(entry)
    }

    async fn recent_audit(&self, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        let state = self.lock()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(state.audit.iter().rev().take(limit).cloned().collect())
    }
}

fn validate_batch(def: &TableDef, batch: &RowBatch, conflict_columns: &[&str]) -> StoreResult<()> {
    let entity = def.entity;
    if let Some(unknown) = batch.columns().iter().find(|c| def.column(c).is_none()) {
        return Err(StoreError::unknown_column(entity, *unknown));
    }
    if !def.is_unique_key(conflict_columns) {
        return Err(StoreError::constraint(
            entity,
            format!(
                "no unique constraint matching conflict columns ({})",
                conflict_columns.join(", ")
            ),
        ));
    }
    Ok(())
}

fn check_row(
    state: &MemoryState,
    def: &TableDef,
    values: &BTreeMap<&'static str, Value>,
) -> StoreResult<()> {
    let entity = def.entity;
    for column in def.columns {
        let value = values.get(column.name).unwrap_or(&Value::Absent);

        if value.is_absent() {
            if !column.nullable {
                return Err(StoreError::constraint(
                    entity,
                    format!("null value in column \"{}\" violates not-null constraint", column.name),
                ));
            }
            continue;
        }

        if !column.kind.accepts(value) {
            return Err(StoreError::invalid_batch(
                entity,
                format!("value {:?} does not fit column \"{}\"", value, column.name),
            ));
        }

        if let (Some(parent), Some(id)) = (column.references, value.as_int()) {
            if !state.ids(parent).contains(&id) {
                return Err(StoreError::constraint(
                    entity,
                    format!(
                        "{}={} is not present in table \"{}\"",
                        column.name, id, parent
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn conflict_key(values: &BTreeMap<&'static str, Value>, columns: &[&str]) -> Option<Vec<Key>> {
    columns
        .iter()
        .map(|c| values.get(*c).and_then(Value::as_key))
        .collect()
}
