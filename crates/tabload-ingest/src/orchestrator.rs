//! Load orchestrator
//!
//! Walks a [`LoadPlan`] one step at a time. Each step reads its source batch,
//! resolves natural keys, checks foreign keys, upserts, and records exactly
//! one audit entry. A failed step is audited and stops the run; steps that
//! already committed stay committed.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::audit::{AuditRecorder, LoadStatus};
use crate::error::LoadError;
use crate::guard::ForeignKeyGuard;
use crate::model::{Customer, EntityType, Product, RowBatch, Transaction, TransactionItem};
use crate::plan::{LoadPlan, LoadStep, StepKind};
use crate::records::{convert_all, CustomerRecord, FromRawRow, ProductRecord, TransactionRecord};
use crate::resolver::{distinct_keys, NaturalKeyRef, NaturalKeyResolver};
use crate::source::{RawRow, RecordSource, SourceKind};
use crate::store::Store;
use crate::upsert::UpsertEngine;

/// Result of one plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Loaded { rows: u64 },
    /// The step's source does not exist
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub entity: EntityType,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Outcome of a completed run, one entry per plan step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub steps: Vec<StepReport>,
}

impl LoadReport {
    pub fn outcome(&self, entity: EntityType) -> Option<StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.entity == entity)
            .map(|s| s.outcome)
    }

    /// Rows written for `entity`, 0 when skipped or not planned
    pub fn rows(&self, entity: EntityType) -> u64 {
        match self.outcome(entity) {
            Some(StepOutcome::Loaded { rows }) => rows,
            _ => 0,
        }
    }

    pub fn total_rows(&self) -> u64 {
        self.steps.iter().map(|s| self.rows(s.entity)).sum()
    }

    pub fn skipped(&self) -> Vec<EntityType> {
        self.steps
            .iter()
            .filter(|s| s.outcome == StepOutcome::Skipped)
            .map(|s| s.entity)
            .collect()
    }
}

type SourceCache = HashMap<SourceKind, Option<Arc<Vec<RawRow>>>>;

pub struct Orchestrator<'a, S: Store + ?Sized, R: RecordSource + ?Sized> {
    store: &'a S,
    source: &'a R,
    plan: LoadPlan,
}

impl<'a, S: Store + ?Sized, R: RecordSource + ?Sized> Orchestrator<'a, S, R> {
    /// Orchestrator running the standard plan
    pub fn new(store: &'a S, source: &'a R) -> Self {
        Self::with_plan(store, source, LoadPlan::standard())
    }

    pub fn with_plan(store: &'a S, source: &'a R, plan: LoadPlan) -> Self {
        Self { store, source, plan }
    }

    pub fn plan(&self) -> &LoadPlan {
        &self.plan
    }

    /// Run every step in plan order, stopping at the first failure
    pub async fn run(&self) -> Result<LoadReport, LoadError> {
        info!(steps = self.plan.len(), "Starting load");

        // Each source is read at most once per run
        let mut cache = SourceCache::new();
        let mut report = LoadReport::default();

        for step in self.plan.steps() {
            let span = info_span!("load_step", entity = %step.entity);
            let outcome = self.run_step(step, &mut cache).instrument(span).await?;
            report.steps.push(StepReport {
                entity: step.entity,
                outcome,
            });
        }

        info!(
            total_rows = report.total_rows(),
            skipped = report.skipped().len(),
            "Load completed"
        );
        Ok(report)
    }

    async fn run_step(&self, step: &LoadStep, cache: &mut SourceCache) -> Result<StepOutcome, LoadError> {
        let entity = step.entity;

        let rows = match self.source_rows(step, cache).await {
            Ok(Some(rows)) => rows,
            Ok(None) => {
                warn!(source = %step.source, "Source absent, skipping");
                return Ok(StepOutcome::Skipped);
            },
            Err(e) => return self.fail(entity, 0, e).await,
        };

        let (attempted, written) = match &step.kind {
            StepKind::NaturalKeys(reference) => {
                let keys = distinct_keys(rows.iter().map(|r| r.get(reference.field)));
                let written = NaturalKeyResolver::new(self.store)
                    .register(reference, &keys)
                    .await;
                (keys.len() as u64, written)
            },
            StepKind::Records { resolves } => {
                let batch = match self.build_batch(step, resolves.as_ref(), &rows).await {
                    Ok(batch) => batch,
                    Err(e) => return self.fail(entity, 0, e).await,
                };
                let attempted = batch.len() as u64;

                if let Err(e) = ForeignKeyGuard::new(self.store)
                    .check_all(&batch, step.guards)
                    .await
                {
                    return self.fail(entity, attempted, e).await;
                }

                let written = UpsertEngine::new(self.store)
                    .upsert(&batch, step.conflict_columns())
                    .await;
                (attempted, written)
            },
        };

        match written {
            Ok(rows) => {
                AuditRecorder::new(self.store)
                    .record(entity, rows, LoadStatus::Success)
                    .await?;
                info!(rows, "Step loaded");
                Ok(StepOutcome::Loaded { rows })
            },
            Err(source) => {
                self.fail(entity, attempted, LoadError::Upsert { entity, source })
                    .await
            },
        }
    }

    async fn source_rows(
        &self,
        step: &LoadStep,
        cache: &mut SourceCache,
    ) -> Result<Option<Arc<Vec<RawRow>>>, LoadError> {
        if let Some(cached) = cache.get(&step.source) {
            return Ok(cached.clone());
        }

        let rows = self
            .source
            .read_batch(step.source)
            .await
            .map_err(|source| LoadError::Source {
                entity: step.entity,
                source,
            })?
            .map(Arc::new);
        cache.insert(step.source, rows.clone());
        Ok(rows)
    }

    /// Typed target rows for a records step
    async fn build_batch(
        &self,
        step: &LoadStep,
        resolves: Option<&NaturalKeyRef>,
        rows: &[RawRow],
    ) -> Result<RowBatch, LoadError> {
        let entity = step.entity;

        let batch = match entity {
            EntityType::Customers => {
                let customers: Vec<Customer> = convert::<CustomerRecord>(entity, rows)?
                    .into_iter()
                    .map(|r| Customer {
                        id: r.id,
                        name: r.name,
                        email: r.email,
                        registration_date: r.registration_date,
                        country: r.country,
                    })
                    .collect();
                RowBatch::from_rows(&customers)
            },
            EntityType::Products => {
                let records = convert::<ProductRecord>(entity, rows)?;
                let supplier_ids = self
                    .resolve(entity, resolves, records.iter().map(|r| r.supplier.as_deref()))
                    .await?;
                let products: Vec<Product> = records
                    .into_iter()
                    .zip(supplier_ids)
                    .map(|(r, supplier_id)| Product {
                        id: r.id,
                        name: r.name,
                        category: r.category,
                        price: r.price,
                        supplier_id,
                    })
                    .collect();
                RowBatch::from_rows(&products)
            },
            EntityType::Transactions => {
                let records = convert::<TransactionRecord>(entity, rows)?;
                let payment_method_ids = self
                    .resolve(
                        entity,
                        resolves,
                        records.iter().map(|r| r.payment_method.as_deref()),
                    )
                    .await?;
                let transactions: Vec<Transaction> = records
                    .into_iter()
                    .zip(payment_method_ids)
                    .map(|(r, payment_method_id)| Transaction {
                        id: r.id,
                        customer_id: r.customer_id,
                        timestamp: r.timestamp,
                        payment_method_id,
                    })
                    .collect();
                RowBatch::from_rows(&transactions)
            },
            EntityType::TransactionItems => {
                let items: Vec<TransactionItem> = convert::<TransactionRecord>(entity, rows)?
                    .into_iter()
                    .map(|r| TransactionItem {
                        transaction_id: r.id,
                        product_id: r.product_id,
                        quantity: r.quantity,
                    })
                    .collect();
                RowBatch::from_rows(&items)
            },
            EntityType::Suppliers | EntityType::PaymentMethods => {
                unreachable!("LoadPlan only builds natural-key steps for {}", entity)
            },
        };

        Ok(batch)
    }

    /// Surrogate ids for `values`, or all absent when the step resolves nothing
    async fn resolve<'v>(
        &self,
        entity: EntityType,
        reference: Option<&NaturalKeyRef>,
        values: impl Iterator<Item = Option<&'v str>>,
    ) -> Result<Vec<Option<i64>>, LoadError> {
        let Some(reference) = reference else {
            return Ok(values.map(|_| None).collect());
        };

        let key_map = NaturalKeyResolver::new(self.store)
            .key_map(reference)
            .await
            .map_err(|source| LoadError::Store { entity, source })?;
        key_map.resolve_all(entity, reference, values)
    }

    /// Audit a failed attempt and hand back the error that caused it
    async fn fail(
        &self,
        entity: EntityType,
        attempted: u64,
        cause: LoadError,
    ) -> Result<StepOutcome, LoadError> {
        error!(error = %cause, attempted, "Step failed");

        if let Err(audit_error) = AuditRecorder::new(self.store)
            .record(entity, attempted, LoadStatus::Failed)
            .await
        {
            error!(error = %audit_error, "Could not record failed load");
        }

        Err(cause)
    }
}

fn convert<T: FromRawRow>(entity: EntityType, rows: &[RawRow]) -> Result<Vec<T>, LoadError> {
    convert_all(rows).map_err(|(row, source)| LoadError::InvalidRecord { entity, row, source })
}
