//! Pricing Record Store backed by SQLite.
//!
//! This module provides:
//! - Database initialization and migrations
//! - The repository: pricing records, the tenant toggle, the snapshot log,
//!   and price history

pub mod migrations;
pub mod repo;

pub use migrations::{init_db, init_db_with};
pub use repo::Repository;
