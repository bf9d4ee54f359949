//! In-memory change log backend for the OctoFHIR offline sync engine.
//!
//! This crate provides [`MemoryDatabase`], which holds local resources and the
//! journal of local mutations, implements the `Database` capability from
//! `octofhir-sync-core` and can persist itself to a JSON file.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_sync_memory::MemoryDatabase;
//! use octofhir_sync_core::Database;
//!
//! let db = MemoryDatabase::new();
//! db.insert(serde_json::json!({"resourceType": "Patient", "id": "p1"})).await?;
//! assert_eq!(db.local_changes_count().await?, 1);
//! ```

mod database;
pub mod storage;

pub use database::MemoryChangeLogTransaction;
pub use octofhir_sync_core::{Database, StorageError};
pub use storage::{MemoryDatabase, StorageKey};
