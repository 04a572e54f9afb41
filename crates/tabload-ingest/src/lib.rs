//! Tabload Ingest Library
//!
//! Loads customers, products and transactions from flat source files into a
//! normalized relational schema. Each run walks a fixed dependency order:
//!
//! 1. **customers**
//! 2. **suppliers**: natural keys named by products
//! 3. **products**: supplier names resolved to ids
//! 4. **payment_methods**: natural keys named by transactions
//! 5. **transactions**: customer references checked, payment methods resolved
//! 6. **transaction_items**: one row per `(transaction, product)`
//!
//! Every step upserts its whole batch atomically and writes one `load_audit`
//! entry, successful or not.
//!
//! # Example
//!
//! ```no_run
//! use tabload_ingest::{CsvSource, Orchestrator, PgStore};
//! use tabload_ingest::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = PgStore::connect(&config.database).await?;
//!     store.init_schema().await?;
//!
//!     let source = CsvSource::new(&config.data_dir);
//!     let report = Orchestrator::new(&store, &source).run().await?;
//!     println!("{} rows loaded", report.total_rows());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod audit;
pub mod config;
pub mod error;
pub mod guard;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod records;
pub mod resolver;
pub mod schema;
pub mod source;
pub mod store;
pub mod upsert;

pub use audit::{AuditEntry, AuditRecorder, LoadStatus};
pub use error::LoadError;
pub use model::{EntityType, RowBatch, Value};
pub use orchestrator::{LoadReport, Orchestrator, StepOutcome};
pub use plan::{LoadPlan, LoadStep};
pub use source::{CsvSource, MemorySource, RawRow, RecordSource, SourceKind};
pub use store::{MemoryStore, PgStore, Store, StoreError};
