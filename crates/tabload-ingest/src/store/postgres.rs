//! PostgreSQL store

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

use super::{Store, StoreError, StoreResult};
use crate::audit::{AuditEntry, LoadStatus, MAX_AUDIT_LIMIT};
use crate::config::{DatabaseConfig, DEFAULT_CHUNK_SIZE};
use crate::model::{EntityType, Key, RowBatch, Value};
use crate::schema::{self, ColumnKind, TableDef, CREATE_STATEMENTS, DROP_STATEMENTS};

/// Postgres caps a statement at 65535 bind parameters
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    chunk_size: usize,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Rows per INSERT statement; a batch still commits as one transaction
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool created"
        );

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create every table and index that does not exist yet
    pub async fn init_schema(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in CREATE_STATEMENTS {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Schema initialized");
        Ok(())
    }

    /// Drop all tables, dependents first, and recreate them empty
    pub async fn reset_schema(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in DROP_STATEMENTS {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("All tables dropped");
        self.init_schema().await
    }

    fn rows_per_statement(&self, columns: usize) -> usize {
        self.chunk_size.min(MAX_BIND_PARAMS / columns.max(1)).max(1)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert(&self, batch: &RowBatch, conflict_columns: &[&str]) -> StoreResult<u64> {
        let entity = batch.entity();
        let def = schema::table(entity);
        let kinds = column_kinds(def, batch)?;

        if !def.is_unique_key(conflict_columns) {
            return Err(StoreError::constraint(
                entity,
                format!(
                    "no unique constraint matching conflict columns ({})",
                    conflict_columns.join(", ")
                ),
            ));
        }

        for row in batch.rows() {
            for ((column, kind), value) in batch.columns().iter().zip(&kinds).zip(row) {
                if !value.is_absent() && !kind.accepts(value) {
                    return Err(StoreError::invalid_batch(
                        entity,
                        format!("value {:?} does not fit column \"{}\"", value, column),
                    ));
                }
            }
        }

        let conflict_clause = conflict_clause(batch.columns(), conflict_columns);
        let chunk_size = self.rows_per_statement(batch.columns().len());
        let mut affected = 0;

        let mut tx = self.pool.begin().await?;
        for chunk in batch.rows().chunks(chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                def.name(),
                batch.columns().join(", ")
            ));

            query_builder.push_values(chunk, |mut b, row| {
                for (kind, value) in kinds.iter().zip(row) {
                    push_value(&mut b, *kind, value);
                }
            });
            query_builder.push(&conflict_clause);

            let result = query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| write_error(entity, e))?;
            affected += result.rows_affected();
        }
        tx.commit().await?;

        debug!(entity = %entity, rows = affected, "Batch committed");
        Ok(affected)
    }

    async fn select_identities(
        &self,
        entity: EntityType,
        key_column: &str,
    ) -> StoreResult<Vec<(Key, i64)>> {
        let def = schema::table(entity);
        let kind = def
            .key_kind(key_column)
            .ok_or_else(|| StoreError::unknown_column(entity, key_column))?;

        let sql = format!(
            "SELECT {} AS lookup_key, id FROM {} WHERE {} IS NOT NULL",
            key_column,
            def.name(),
            key_column
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| -> StoreResult<(Key, i64)> {
                let id: i64 = row.try_get("id")?;
                let key = match kind {
                    ColumnKind::Int => Key::Int(row.try_get("lookup_key")?),
                    _ => Key::Text(row.try_get("lookup_key")?),
                };
                Ok((key, id))
            })
            .collect()
    }

    async fn insert_audit(
        &self,
        entity: EntityType,
        row_count: u64,
        status: LoadStatus,
    ) -> StoreResult<AuditEntry> {
        let entry = sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO load_audit (table_name, row_count, status)
            VALUES ($1, $2, $3)
            RETURNING id, load_timestamp, table_name, row_count, status
            "#,
        )
        .bind(entity.table_name())
        .bind(i64::try_from(row_count).unwrap_or(i64::MAX))
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn recent_audit(&self, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, load_timestamp, table_name, row_count, status
            FROM load_audit
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(0, MAX_AUDIT_LIMIT))
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

/// Column kinds in batch order; batch columns must exist in the table
fn column_kinds(def: &TableDef, batch: &RowBatch) -> StoreResult<Vec<ColumnKind>> {
    batch
        .columns()
        .iter()
        .map(|name| {
            def.column(name)
                .map(|c| c.kind)
                .ok_or_else(|| StoreError::unknown_column(def.entity, *name))
        })
        .collect()
}

/// `ON CONFLICT` clause overwriting every non-key column. Key-only tables
/// rewrite the key itself so the statement stays an upsert and ids are kept.
fn conflict_clause(columns: &[&str], conflict_columns: &[&str]) -> String {
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !conflict_columns.contains(*c))
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();

    let set = if updates.is_empty() {
        conflict_columns
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        updates.join(", ")
    };

    format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        conflict_columns.join(", "),
        set
    )
}

/// Bind one value; absent values become NULLs typed after their column
fn push_value(b: &mut Separated<'_, '_, Postgres, &'static str>, kind: ColumnKind, value: &Value) {
    match (kind, value) {
        (ColumnKind::Float, Value::Int(v)) => b.push_bind(*v as f64),
        (_, Value::Int(v)) => b.push_bind(*v),
        (_, Value::Float(v)) => b.push_bind(*v),
        (_, Value::Text(v)) => b.push_bind(v.clone()),
        (_, Value::Date(v)) => b.push_bind(*v),
        (_, Value::Timestamp(v)) => b.push_bind(*v),
        (ColumnKind::Int, Value::Absent) => b.push_bind(None::<i64>),
        (ColumnKind::Float, Value::Absent) => b.push_bind(None::<f64>),
        (ColumnKind::Text, Value::Absent) => b.push_bind(None::<String>),
        (ColumnKind::Date, Value::Absent) => b.push_bind(None::<chrono::NaiveDate>),
        (ColumnKind::Timestamp, Value::Absent) => b.push_bind(None::<chrono::NaiveDateTime>),
    };
}

/// Integrity violations (SQLSTATE class 23) surface as constraint errors
fn write_error(entity: EntityType, error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.code().is_some_and(|code| code.starts_with("23")) {
            return StoreError::constraint(entity, db.message());
        }
    }
    StoreError::Database(error)
}
