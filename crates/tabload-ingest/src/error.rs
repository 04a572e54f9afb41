//! Pipeline error taxonomy
//!
//! Every [`LoadError`] names the entity type whose step failed. A source that
//! does not exist is not an error; the orchestrator skips it.

use std::collections::BTreeSet;
use std::fmt::Display;
use thiserror::Error;

use crate::model::{EntityType, Key};
use crate::records::FieldError;
use crate::source::SourceError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read source for {entity}: {source}")]
    Source {
        entity: EntityType,
        #[source]
        source: SourceError,
    },

    #[error("Invalid {entity} record at row {row}: {source}")]
    InvalidRecord {
        entity: EntityType,
        row: usize,
        #[source]
        source: FieldError,
    },

    /// Natural-key values with no surrogate identity after their upsert
    #[error(
        "Could not resolve {field} for {entity}: no identity for {}",
        join(.missing)
    )]
    Resolution {
        entity: EntityType,
        field: &'static str,
        missing: BTreeSet<Key>,
    },

    /// Foreign-key values absent from the parent table
    #[error(
        "Referential integrity violation on {entity}: {column} references missing {parent} ids {}",
        join(.missing)
    )]
    ReferentialIntegrity {
        entity: EntityType,
        column: &'static str,
        parent: EntityType,
        missing: BTreeSet<i64>,
    },

    #[error("Upsert into {entity} failed: {source}")]
    Upsert {
        entity: EntityType,
        #[source]
        source: StoreError,
    },

    /// A read needed by the step (identities of a parent table) failed
    #[error("Store read for {entity} failed: {source}")]
    Store {
        entity: EntityType,
        #[source]
        source: StoreError,
    },

    #[error("Failed to record audit entry for {entity}: {source}")]
    Audit {
        entity: EntityType,
        #[source]
        source: StoreError,
    },
}

impl LoadError {
    /// The entity type whose step failed
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Source { entity, .. }
            | Self::InvalidRecord { entity, .. }
            | Self::Resolution { entity, .. }
            | Self::ReferentialIntegrity { entity, .. }
            | Self::Upsert { entity, .. }
            | Self::Store { entity, .. }
            | Self::Audit { entity, .. } => *entity,
        }
    }
}

fn join<T: Display>(items: &BTreeSet<T>) -> String {
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    format!("{{{}}}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referential_integrity_message_lists_every_missing_id() {
        let err = LoadError::ReferentialIntegrity {
            entity: EntityType::Transactions,
            column: "customer_id",
            parent: EntityType::Customers,
            missing: BTreeSet::from([99, 7]),
        };

        assert_eq!(err.entity_type(), EntityType::Transactions);
        assert_eq!(
            err.to_string(),
            "Referential integrity violation on transactions: customer_id references missing customers ids {7, 99}"
        );
    }

    #[test]
    fn test_resolution_message() {
        let err = LoadError::Resolution {
            entity: EntityType::Products,
            field: "supplier",
            missing: BTreeSet::from([Key::Text("Acme".into())]),
        };
        assert!(err.to_string().ends_with("no identity for {Acme}"));
    }
}
