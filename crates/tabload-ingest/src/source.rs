//! Record sources
//!
//! The pipeline consumes raw rows through [`RecordSource`]. A source that does
//! not exist is reported as `Ok(None)` so the orchestrator can skip the
//! entity types fed by it.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// The flat files the pipeline reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Customers,
    Products,
    Transactions,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Customers,
        SourceKind::Products,
        SourceKind::Transactions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Products => "products",
            Self::Transactions => "transactions",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Customers => "customers.csv",
            Self::Products => "products.csv",
            Self::Transactions => "transactions.csv",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One loosely-typed source row
///
/// Values are stored trimmed. A field mapped to `None` was present but empty
/// or blank; a field missing from the map was never provided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    fields: BTreeMap<String, Option<String>>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert used by tests and in-memory sources
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, Some(value.into()));
        self
    }

    /// Insert a field, trimmed; blank values are recorded as absent
    pub fn insert(&mut self, field: impl Into<String>, value: Option<String>) {
        let value = value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self.fields.insert(field.into(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Value of a field, `None` when missing or empty
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }
}

/// Supplier of raw rows, one ordered batch per source kind
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Read the whole batch for `kind`, `Ok(None)` if the source does not exist
    async fn read_batch(&self, kind: SourceKind) -> Result<Option<Vec<RawRow>>, SourceError>;
}

// ============================================================================
// CSV Source
// ============================================================================

/// Reads `<dir>/customers.csv`, `<dir>/products.csv` and `<dir>/transactions.csv`
#[derive(Debug, Clone)]
pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: SourceKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }
}

#[async_trait]
impl RecordSource for CsvSource {
    async fn read_batch(&self, kind: SourceKind) -> Result<Option<Vec<RawRow>>, SourceError> {
        let path = self.path_for(kind);
        if !path.exists() {
            debug!(path = %path.display(), "Source file not present");
            return Ok(None);
        }

        let rows = read_csv(&path)?;
        debug!(path = %path.display(), rows = rows.len(), "Read source file");
        Ok(Some(rows))
    }
}

fn read_csv(path: &Path) -> Result<Vec<RawRow>, SourceError> {
    let csv_err = |source| SourceError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let file = std::fs::File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(file);

    let headers = reader.headers().map_err(csv_err)?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let mut row = RawRow::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header, Some(value.to_string()));
        }
        rows.push(row);
    }

    Ok(rows)
}

// ============================================================================
// In-Memory Source
// ============================================================================

/// Fixed batches held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    batches: HashMap<SourceKind, Vec<RawRow>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(mut self, kind: SourceKind, rows: Vec<RawRow>) -> Self {
        self.batches.insert(kind, rows);
        self
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn read_batch(&self, kind: SourceKind) -> Result<Option<Vec<RawRow>>, SourceError> {
        Ok(self.batches.get(&kind).cloned())
    }
}
