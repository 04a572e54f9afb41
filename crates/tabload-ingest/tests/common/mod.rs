//! Shared test infrastructure
//!
//! CSV fixtures for pipeline tests and a PostgreSQL container for the
//! database tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::{write_fixtures, TestPostgres};
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn my_test() {
//!     let pg = TestPostgres::start().await.unwrap();
//!     let store = pg.store();
//! }
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use std::path::Path;
use tabload_ingest::PgStore;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

pub const CUSTOMERS_CSV: &str = "\
id,name,email,registration_date,country
1,Ada Lovelace,ada@example.com,2023-01-15,United Kingdom
2,Grace Hopper,grace@example.com,2023-02-20,United States
3,Linus Torvalds,linus@example.com,,Finland
";

pub const PRODUCTS_CSV: &str = "\
id,name,category,price,supplier
1,Lamp,Home,19.99,Acme Corp
2,Desk,Office,120.00,Globex
3,Chair,Office,45.50,Acme Corp
";

/// Transaction 100 spans two products; its header fields repeat per line
pub const TRANSACTIONS_CSV: &str = "\
id,customer_id,product_id,quantity,timestamp,payment_method
100,1,1,2,2024-01-05T10:00:00,Credit Card
100,1,3,1,2024-01-05T10:00:00,Credit Card
101,2,2,1,2024-01-06 12:30:00,PayPal
102,3,1,4,2024-01-07T09:15:00.250000,Credit Card
";

/// Write the standard fixture set into `dir`
pub fn write_fixtures(dir: &Path) -> Result<()> {
    write_source(dir, "customers.csv", CUSTOMERS_CSV)?;
    write_source(dir, "products.csv", PRODUCTS_CSV)?;
    write_source(dir, "transactions.csv", TRANSACTIONS_CSV)?;
    Ok(())
}

pub fn write_source(dir: &Path, file_name: &str, contents: &str) -> Result<()> {
    std::fs::write(dir.join(file_name), contents)
        .with_context(|| format!("Failed to write fixture {}", file_name))
}

/// Initialize tracing for tests; safe to call more than once
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tabload_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

/// A PostgreSQL container with the tabload schema created
pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    store: PgStore,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let config = tabload_ingest::config::DatabaseConfig {
            url: connection_string.clone(),
            ..Default::default()
        };
        let store = PgStore::connect(&config)
            .await
            .context("Failed to connect to PostgreSQL")?
            .with_chunk_size(2);
        store.init_schema().await.context("Failed to create schema")?;

        Ok(Self {
            container,
            store,
            connection_string,
        })
    }

    pub fn store(&self) -> &PgStore {
        &self.store
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(self.store.pool())
            .await
            .with_context(|| format!("Failed to count {}", table))?;
        Ok(count)
    }
}
