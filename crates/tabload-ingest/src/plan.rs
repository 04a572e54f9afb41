//! Load plan
//!
//! The order of a run is data: a list of [`LoadStep`] descriptors the
//! orchestrator walks front to back. [`LoadPlan::new`] rejects plans that
//! would run a step before a parent it depends on, or that load an entity in
//! a way other than its standard step kind.

use std::collections::HashSet;
use thiserror::Error;

use crate::guard::ForeignKey;
use crate::model::EntityType;
use crate::resolver::NaturalKeyRef;
use crate::schema;
use crate::source::SourceKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Plan loads {0} more than once")]
    Duplicate(EntityType),

    #[error("Plan loads {entity} before {dependency}, which it depends on")]
    OutOfOrder {
        entity: EntityType,
        dependency: EntityType,
    },

    #[error("Plan step for {entity} has kind {kind:?}, expected {expected:?}")]
    KindMismatch {
        entity: EntityType,
        kind: StepKind,
        expected: StepKind,
    },
}

/// What a step does with its source batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Register the distinct natural-key values a source field names
    NaturalKeys(NaturalKeyRef),
    /// Convert source rows into target rows, resolving an optional natural key
    Records { resolves: Option<NaturalKeyRef> },
}

/// One entity type's load, as run by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStep {
    pub entity: EntityType,
    pub source: SourceKind,
    pub kind: StepKind,
    /// Foreign keys checked against existing parent rows before the upsert
    pub guards: &'static [ForeignKey],
}

const TRANSACTION_GUARDS: &[ForeignKey] = &[ForeignKey::new("customer_id", EntityType::Customers)];

const TRANSACTION_ITEM_GUARDS: &[ForeignKey] = &[
    ForeignKey::new("transaction_id", EntityType::Transactions),
    ForeignKey::new("product_id", EntityType::Products),
];

impl LoadStep {
    /// The standard step for `entity`
    pub const fn standard(entity: EntityType) -> Self {
        match entity {
            EntityType::Customers => Self {
                entity,
                source: SourceKind::Customers,
                kind: StepKind::Records { resolves: None },
                guards: &[],
            },
            EntityType::Suppliers => Self {
                entity,
                source: SourceKind::Products,
                kind: StepKind::NaturalKeys(NaturalKeyRef::SUPPLIER),
                guards: &[],
            },
            EntityType::Products => Self {
                entity,
                source: SourceKind::Products,
                kind: StepKind::Records {
                    resolves: Some(NaturalKeyRef::SUPPLIER),
                },
                guards: &[],
            },
            EntityType::PaymentMethods => Self {
                entity,
                source: SourceKind::Transactions,
                kind: StepKind::NaturalKeys(NaturalKeyRef::PAYMENT_METHOD),
                guards: &[],
            },
            EntityType::Transactions => Self {
                entity,
                source: SourceKind::Transactions,
                kind: StepKind::Records {
                    resolves: Some(NaturalKeyRef::PAYMENT_METHOD),
                },
                guards: TRANSACTION_GUARDS,
            },
            EntityType::TransactionItems => Self {
                entity,
                source: SourceKind::Transactions,
                kind: StepKind::Records { resolves: None },
                guards: TRANSACTION_ITEM_GUARDS,
            },
        }
    }

    /// Unique columns the upsert matches on
    pub fn conflict_columns(&self) -> &'static [&'static str] {
        schema::table(self.entity).unique_key
    }

    pub fn resolves(&self) -> Option<&NaturalKeyRef> {
        match &self.kind {
            StepKind::Records { resolves } => resolves.as_ref(),
            StepKind::NaturalKeys(_) => None,
        }
    }

    /// Entity types that must be loaded before this one
    pub fn dependencies(&self) -> Vec<EntityType> {
        self.resolves()
            .map(|r| r.entity)
            .into_iter()
            .chain(self.guards.iter().map(|g| g.parent))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    steps: Vec<LoadStep>,
}

impl LoadPlan {
    /// customers, suppliers, products, payment_methods, transactions, transaction_items
    pub fn standard() -> Self {
        Self {
            steps: EntityType::ALL.into_iter().map(LoadStep::standard).collect(),
        }
    }

    /// A custom plan. A dependency that is part of the plan must come earlier;
    /// one left out is assumed to be loaded already. Every step keeps the
    /// kind of its entity's standard step.
    pub fn new(steps: Vec<LoadStep>) -> Result<Self, PlanError> {
        let planned: HashSet<EntityType> = steps.iter().map(|s| s.entity).collect();
        let mut done = HashSet::new();

        for step in &steps {
            let expected = LoadStep::standard(step.entity).kind;
            if step.kind != expected {
                return Err(PlanError::KindMismatch {
                    entity: step.entity,
                    kind: step.kind,
                    expected,
                });
            }
            for dependency in step.dependencies() {
                if planned.contains(&dependency) && !done.contains(&dependency) {
                    return Err(PlanError::OutOfOrder {
                        entity: step.entity,
                        dependency,
                    });
                }
            }
            if !done.insert(step.entity) {
                return Err(PlanError::Duplicate(step.entity));
            }
        }

        Ok(Self { steps })
    }

    /// Plan of the standard steps for `entities`, in the order given
    pub fn for_entities(entities: &[EntityType]) -> Result<Self, PlanError> {
        Self::new(entities.iter().copied().map(LoadStep::standard).collect())
    }

    pub fn steps(&self) -> &[LoadStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for LoadPlan {
    fn default() -> Self {
        Self::standard()
    }
}
