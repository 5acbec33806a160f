//! Shared library for the comment relay workspace.
//!
//! This crate provides common functionality used by the worker and its
//! library crates:
//! - Configuration management
//! - Job and comment models
//! - Job-state persistence
//! - Logging infrastructure

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use config::{ApiCredentials, Config};
pub use db::Database;
pub use logging::LogConfig;
pub use models::*;
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
