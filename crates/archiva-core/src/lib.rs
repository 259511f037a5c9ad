//! Core types and engine for the Archiva records-retention service.
//!
//! Tracks every document and case file against its retention schedule (TRD),
//! advances it through the archival stages, raises alerts ahead of deadlines
//! and executes the irreversible final disposition.
//!
//! This crate has no database dependencies. Persistence is
//! reached through the [`store::RetentionStore`] trait; `archiva-store-sqlite`
//! provides the production backend.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod alert;
pub mod clock;
pub mod config;
pub mod disposition;
pub mod engine;
pub mod entity;
pub mod error;
pub mod history;
pub mod integrity;
pub mod lifecycle;
pub mod process;
pub mod schedule;
pub mod store;
pub mod view;

pub use engine::RetentionEngine;
pub use error::{Error, Result};
