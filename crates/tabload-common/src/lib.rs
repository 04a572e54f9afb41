//! Tabload Common Library
//!
//! Shared error handling and logging for the tabload workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`TabloadError`] and the [`Result`] alias used for
//!   configuration and environment problems
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use tabload_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TabloadError};
