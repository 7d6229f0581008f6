//! Database module: per-target SQLite files, core schema and the module catalog.
//!
//! Layout:
//! - `schema.rs`: core DDL applied to every target, and the statement runner modules share
//! - `models.rs`: Rust structs mirroring core rows
//! - `target.rs`: opening, creating and deleting target databases
//! - `catalog.rs`: queries over the core tables

pub mod catalog;
pub mod models;
pub mod schema;
pub mod target;

pub use models::{DbAccount, DbModule, DbRegion};
pub use schema::{CORE_SCHEMA, apply_statements};
pub use target::TargetStore;
