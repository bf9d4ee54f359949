//! Local change tracking primitives for offline FHIR clients.
//!
//! This crate provides the data model shared by the change-log backends and
//! the upload engine:
//!
//! - [`ChangeLogEntry`] / [`LocalChange`] / [`LocalChangeToken`] - journal rows
//!   and the upload view derived from them
//! - [`Database`] / [`ChangeLogTransaction`] - the storage capability the
//!   upload engine consumes
//! - [`StorageError`] - error taxonomy for storage operations
//! - [`change_log`] and [`reference`] helpers used by writers and consolidators

pub mod change_log;
mod error;
pub mod id;
pub mod reference;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{ChangeLogTransaction, Database};
pub use types::{
    ChangeLogEntry, ChangeType, LocalChange, LocalChangeToken, ResourceIdentityUpdate,
};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared database trait object.
pub type DynDatabase = std::sync::Arc<dyn Database>;
