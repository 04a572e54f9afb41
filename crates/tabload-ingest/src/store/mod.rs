//! Persistence interface
//!
//! The pipeline talks to its target through [`Store`]. Two implementations:
//!
//! - [`PgStore`]: PostgreSQL via sqlx, one transaction per upserted batch
//! - [`MemoryStore`]: an in-process store with the same constraint semantics,
//!   used by tests and dry runs

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::audit::{AuditEntry, LoadStatus};
use crate::model::{EntityType, Key, RowBatch};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A write violated a table constraint (not null, unique, foreign key)
    #[error("Constraint violation on {table}: {message}")]
    Constraint {
        table: &'static str,
        message: String,
    },

    #[error("Unknown column '{column}' on {table}")]
    UnknownColumn { table: &'static str, column: String },

    #[error("Invalid batch for {table}: {message}")]
    InvalidBatch {
        table: &'static str,
        message: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn constraint(entity: EntityType, message: impl Into<String>) -> Self {
        Self::Constraint {
            table: entity.table_name(),
            message: message.into(),
        }
    }

    pub fn invalid_batch(entity: EntityType, message: impl Into<String>) -> Self {
        Self::InvalidBatch {
            table: entity.table_name(),
            message: message.into(),
        }
    }

    pub fn unknown_column(entity: EntityType, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: entity.table_name(),
            column: column.into(),
        }
    }
}

/// Relational target of the load pipeline
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert-or-update every row of `batch`, matching existing rows on
    /// `conflict_columns`. All rows commit together or none do.
    ///
    /// Returns the number of rows inserted or updated.
    async fn upsert(&self, batch: &RowBatch, conflict_columns: &[&str]) -> StoreResult<u64>;

    /// `(key value, surrogate id)` for every stored row of `entity`
    async fn select_identities(
        &self,
        entity: EntityType,
        key_column: &str,
    ) -> StoreResult<Vec<(Key, i64)>>;

    /// Append one audit entry; the load timestamp is assigned by the store
    async fn insert_audit(
        &self,
        entity: EntityType,
        row_count: u64,
        status: LoadStatus,
    ) -> StoreResult<AuditEntry>;

    /// Most recent audit entries, newest first
    async fn recent_audit(&self, limit: i64) -> StoreResult<Vec<AuditEntry>>;
}
