//! Load audit trail
//!
//! One append-only `load_audit` entry per entity-type load attempt, written
//! whether the attempt succeeded or not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LoadError;
use crate::model::EntityType;
use crate::store::Store;

/// Default number of entries listed by `tabload audit`
pub const DEFAULT_AUDIT_LIMIT: i64 = 20;

/// Upper bound for a single audit listing
pub const MAX_AUDIT_LIMIT: i64 = 1000;

/// A persisted audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub load_timestamp: DateTime<Utc>,
    pub table_name: String,
    pub row_count: i64,
    pub status: String,
}

impl AuditEntry {
    pub fn load_status(&self) -> Option<LoadStatus> {
        self.status.parse().ok()
    }
}

/// Outcome of one load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Success,
    Failed,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown load status '{}'", other)),
        }
    }
}

/// Writes audit entries through a [`Store`]
pub struct AuditRecorder<'a, S: Store + ?Sized> {
    store: &'a S,
}

impl<'a, S: Store + ?Sized> AuditRecorder<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        entity: EntityType,
        row_count: u64,
        status: LoadStatus,
    ) -> Result<AuditEntry, LoadError> {
        let entry = self
            .store
            .insert_audit(entity, row_count, status)
            .await
            .map_err(|source| LoadError::Audit { entity, source })?;

        debug!(
            audit_id = entry.id,
            entity = %entity,
            row_count,
            status = %status,
            "Recorded load audit entry"
        );

        Ok(entry)
    }
}
