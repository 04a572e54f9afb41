//! Target schema: table definitions and PostgreSQL DDL
//!
//! The table definitions drive batch column order, typed NULL binding,
//! conflict columns and the in-memory store's constraint checks. The DDL
//! bootstraps a fresh database; it is not a migration system.

use crate::model::{EntityType, Value};

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Text,
    Date,
    Timestamp,
}

impl ColumnKind {
    /// Whether a present value can be stored in a column of this kind.
    /// Integers widen into float columns.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnKind::Int, Value::Int(_))
                | (ColumnKind::Float, Value::Float(_) | Value::Int(_))
                | (ColumnKind::Text, Value::Text(_))
                | (ColumnKind::Date, Value::Date(_))
                | (ColumnKind::Timestamp, Value::Timestamp(_))
        )
    }
}

/// How a table's surrogate `id` is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// `id` is a column supplied by the source
    Source,
    /// `id` is assigned by the store and never part of a batch
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
    pub references: Option<EntityType>,
}

impl Column {
    const fn required(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            references: None,
        }
    }

    const fn optional(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
            references: None,
        }
    }

    const fn references(self, parent: EntityType) -> Self {
        Self {
            references: Some(parent),
            ..self
        }
    }
}

#[derive(Debug)]
pub struct TableDef {
    pub entity: EntityType,
    pub identity: Identity,
    /// Insertable columns, in batch order
    pub columns: &'static [Column],
    /// Unique key used as the upsert conflict target
    pub unique_key: &'static [&'static str],
}

impl TableDef {
    pub fn name(&self) -> &'static str {
        self.entity.table_name()
    }

    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Kind of a column usable as a lookup key; `id` is always an integer
    pub fn key_kind(&self, name: &str) -> Option<ColumnKind> {
        if name == "id" {
            return Some(ColumnKind::Int);
        }
        self.column(name).map(|c| c.kind)
    }

    /// True when `columns` names exactly the table's unique key
    pub fn is_unique_key(&self, columns: &[&str]) -> bool {
        columns.len() == self.unique_key.len()
            && self.unique_key.iter().all(|k| columns.contains(k))
    }
}

use ColumnKind::{Date, Float, Int, Text, Timestamp};

static SUPPLIERS: TableDef = TableDef {
    entity: EntityType::Suppliers,
    identity: Identity::Generated,
    columns: &[Column::required("name", Text)],
    unique_key: &["name"],
};

static PAYMENT_METHODS: TableDef = TableDef {
    entity: EntityType::PaymentMethods,
    identity: Identity::Generated,
    columns: &[Column::required("method", Text)],
    unique_key: &["method"],
};

static CUSTOMERS: TableDef = TableDef {
    entity: EntityType::Customers,
    identity: Identity::Source,
    columns: &[
        Column::required("id", Int),
        Column::required("name", Text),
        Column::required("email", Text),
        Column::optional("registration_date", Date),
        Column::optional("country", Text),
    ],
    unique_key: &["id"],
};

static PRODUCTS: TableDef = TableDef {
    entity: EntityType::Products,
    identity: Identity::Source,
    columns: &[
        Column::required("id", Int),
        Column::required("name", Text),
        Column::optional("category", Text),
        Column::required("price", Float),
        Column::required("supplier_id", Int).references(EntityType::Suppliers),
    ],
    unique_key: &["id"],
};

static TRANSACTIONS: TableDef = TableDef {
    entity: EntityType::Transactions,
    identity: Identity::Source,
    columns: &[
        Column::required("id", Int),
        Column::required("customer_id", Int).references(EntityType::Customers),
        Column::optional("timestamp", Timestamp),
        Column::optional("payment_method_id", Int).references(EntityType::PaymentMethods),
    ],
    unique_key: &["id"],
};

static TRANSACTION_ITEMS: TableDef = TableDef {
    entity: EntityType::TransactionItems,
    identity: Identity::Generated,
    columns: &[
        Column::required("transaction_id", Int).references(EntityType::Transactions),
        Column::required("product_id", Int).references(EntityType::Products),
        Column::required("quantity", Int),
    ],
    unique_key: &["transaction_id", "product_id"],
};

/// Definition of the table backing `entity`
pub fn table(entity: EntityType) -> &'static TableDef {
    match entity {
        EntityType::Customers => &CUSTOMERS,
        EntityType::Suppliers => &SUPPLIERS,
        EntityType::Products => &PRODUCTS,
        EntityType::PaymentMethods => &PAYMENT_METHODS,
        EntityType::Transactions => &TRANSACTIONS,
        EntityType::TransactionItems => &TRANSACTION_ITEMS,
    }
}

// ============================================================================
// PostgreSQL DDL
// ============================================================================

/// CREATE statements in dependency order, one statement per entry
pub const CREATE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS suppliers (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(100) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_methods (
        id BIGSERIAL PRIMARY KEY,
        method VARCHAR(100) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customers (
        id BIGINT PRIMARY KEY,
        name VARCHAR(100) NOT NULL,
        email VARCHAR(100) NOT NULL,
        registration_date DATE,
        country VARCHAR(100)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id BIGINT PRIMARY KEY,
        name VARCHAR(100) NOT NULL,
        category VARCHAR(100),
        price DOUBLE PRECISION NOT NULL CHECK (price >= 0),
        supplier_id BIGINT NOT NULL REFERENCES suppliers (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id BIGINT PRIMARY KEY,
        customer_id BIGINT NOT NULL REFERENCES customers (id),
        timestamp TIMESTAMP,
        payment_method_id BIGINT REFERENCES payment_methods (id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transaction_items (
        id BIGSERIAL PRIMARY KEY,
        transaction_id BIGINT NOT NULL REFERENCES transactions (id),
        product_id BIGINT NOT NULL REFERENCES products (id),
        quantity BIGINT NOT NULL CHECK (quantity > 0),
        CONSTRAINT uix_transaction_product UNIQUE (transaction_id, product_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS load_audit (
        id BIGSERIAL PRIMARY KEY,
        load_timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        table_name TEXT NOT NULL,
        row_count BIGINT NOT NULL,
        status TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_products_category ON products (category)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_customer ON transactions (customer_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_transaction_items_product ON transaction_items (product_id)",
];

/// DROP statements, dependents first
pub const DROP_STATEMENTS: &[&str] = &[
    "DROP TABLE IF EXISTS load_audit",
    "DROP TABLE IF EXISTS transaction_items",
    "DROP TABLE IF EXISTS transactions",
    "DROP TABLE IF EXISTS products",
    "DROP TABLE IF EXISTS customers",
    "DROP TABLE IF EXISTS payment_methods",
    "DROP TABLE IF EXISTS suppliers",
];
