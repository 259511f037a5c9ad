//! SQLite backend for the Archiva retention engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every process mutation is one
//! immediate-mode transaction guarded by a version compare-and-swap.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
