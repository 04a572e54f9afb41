//! Target-side data model
//!
//! Entity types, the value representation handed to the store, and the typed
//! target rows the pipeline builds before persisting them.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::schema;

// ============================================================================
// Entity Types
// ============================================================================

/// Every table the pipeline loads, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Customers,
    Suppliers,
    Products,
    PaymentMethods,
    Transactions,
    TransactionItems,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Customers,
        EntityType::Suppliers,
        EntityType::Products,
        EntityType::PaymentMethods,
        EntityType::Transactions,
        EntityType::TransactionItems,
    ];

    /// Table name in the target schema (also the audit `table_name`)
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Suppliers => "suppliers",
            Self::Products => "products",
            Self::PaymentMethods => "payment_methods",
            Self::Transactions => "transactions",
            Self::TransactionItems => "transaction_items",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityType::ALL
            .into_iter()
            .find(|entity| entity.table_name() == s)
            .ok_or_else(|| format!("unknown entity type '{}'", s))
    }
}

// ============================================================================
// Values
// ============================================================================

/// A hashable key value: natural keys are text, identities are integers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{}", v),
            Key::Text(v) => write!(f, "{}", v),
        }
    }
}

/// A single column value on its way to the store
///
/// `Absent` is the explicit "no value" marker written as SQL NULL. An empty
/// string stays `Text("")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Absent,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Key form of this value, `None` when absent or not usable as a key
    pub fn as_key(&self) -> Option<Key> {
        match self {
            Value::Int(v) => Some(Key::Int(*v)),
            Value::Text(v) => Some(Key::Text(v.clone())),
            Value::Date(v) => Some(Key::Text(v.to_string())),
            Value::Timestamp(v) => Some(Key::Text(v.to_string())),
            Value::Float(_) | Value::Absent => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// NaN floats carry no information and are stored as absent
    pub fn normalized(self) -> Self {
        match self {
            Value::Float(v) if v.is_nan() => Value::Absent,
            other => other,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Absent)
    }
}

// ============================================================================
// Row Batches
// ============================================================================

/// Rows of one entity type sharing a uniform column set
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    entity: EntityType,
    columns: Vec<&'static str>,
    rows: Vec<Vec<Value>>,
}

impl RowBatch {
    pub fn new(entity: EntityType, columns: Vec<&'static str>) -> Self {
        Self {
            entity,
            columns,
            rows: Vec::new(),
        }
    }

    /// Batch of typed target rows, columns taken from the table definition
    pub fn from_rows<R: TargetRow>(rows: &[R]) -> Self {
        Self {
            entity: R::ENTITY,
            columns: schema::table(R::ENTITY).column_names(),
            rows: rows.iter().map(TargetRow::values).collect(),
        }
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == name)
    }

    /// Values of one column across all rows
    pub fn column_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Value> + 'a {
        let index = self.column_index(name);
        self.rows
            .iter()
            .filter_map(move |row| index.and_then(|i| row.get(i)))
    }

    pub(crate) fn replace_rows(&mut self, rows: Vec<Vec<Value>>) {
        self.rows = rows;
    }
}

// ============================================================================
// Target Rows
// ============================================================================

/// A typed row of one target table
///
/// `values` must follow the column order of [`schema::table`] for `ENTITY`.
pub trait TargetRow {
    const ENTITY: EntityType;

    fn values(&self) -> Vec<Value>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Supplier {
    pub name: String,
}

impl TargetRow for Supplier {
    const ENTITY: EntityType = EntityType::Suppliers;

    fn values(&self) -> Vec<Value> {
        vec![self.name.as_str().into()]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentMethod {
    pub method: String,
}

impl TargetRow for PaymentMethod {
    const ENTITY: EntityType = EntityType::PaymentMethods;

    fn values(&self) -> Vec<Value> {
        vec![self.method.as_str().into()]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub registration_date: Option<NaiveDate>,
    pub country: Option<String>,
}

impl TargetRow for Customer {
    const ENTITY: EntityType = EntityType::Customers;

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.name.as_str().into(),
            self.email.as_str().into(),
            self.registration_date.into(),
            self.country.clone().into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub price: f64,
    /// `None` only when the source row named no supplier; the store rejects it
    pub supplier_id: Option<i64>,
}

impl TargetRow for Product {
    const ENTITY: EntityType = EntityType::Products;

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.name.as_str().into(),
            self.category.clone().into(),
            self.price.into(),
            self.supplier_id.into(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub customer_id: i64,
    pub timestamp: Option<NaiveDateTime>,
    pub payment_method_id: Option<i64>,
}

impl TargetRow for Transaction {
    const ENTITY: EntityType = EntityType::Transactions;

    fn values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.customer_id.into(),
            self.timestamp.into(),
            self.payment_method_id.into(),
        ]
    }
}

/// Line item of a transaction; carries no price-at-sale
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionItem {
    pub transaction_id: i64,
    pub product_id: i64,
    pub quantity: i64,
}

impl TargetRow for TransactionItem {
    const ENTITY: EntityType = EntityType::TransactionItems;

    fn values(&self) -> Vec<Value> {
        vec![
            self.transaction_id.into(),
            self.product_id.into(),
            self.quantity.into(),
        ]
    }
}
