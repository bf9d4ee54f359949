//! Storage traits consumed by the upload engine.
//!
//! A backend exposes the journal of local mutations through [`Database`] and
//! writes consolidation results through a [`ChangeLogTransaction`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{LocalChange, LocalChangeToken, ResourceIdentityUpdate};

/// The change-log capability every local store must implement.
///
/// Implementations must be thread-safe (`Send + Sync`): foreground edits may
/// append to the journal while an upload session reads and clears it.
///
/// # Example
///
/// ```ignore
/// use octofhir_sync_core::{Database, StorageError};
///
/// async fn pending(db: &dyn Database) -> Result<usize, StorageError> {
///     Ok(db.get_all_local_changes().await?.len())
/// }
/// ```
#[async_trait]
pub trait Database: Send + Sync {
    /// Returns one single-entry local change per pending journal row, in
    /// ascending journal id order.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues.
    async fn get_all_local_changes(&self) -> Result<Vec<LocalChange>, StorageError>;

    /// Returns the pending journal rows covered by `token`.
    ///
    /// Rows that were already cleared are silently skipped.
    async fn get_local_changes(
        &self,
        token: &LocalChangeToken,
    ) -> Result<Vec<LocalChange>, StorageError>;

    /// Returns the number of pending journal rows.
    async fn local_changes_count(&self) -> Result<usize, StorageError>;

    /// Returns the number of distinct resources with at least one pending row.
    async fn pending_resource_count(&self) -> Result<usize, StorageError>;

    /// Returns the last server-confirmed state of a resource, if any.
    async fn synced_snapshot(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Value>, StorageError>;

    /// Begins a new transaction over the journal and resource rows.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if a transaction cannot be started.
    async fn begin_transaction(&self) -> Result<Box<dyn ChangeLogTransaction>, StorageError>;

    /// Deletes the journal rows covered by `token` in a transaction of its own.
    async fn delete_changes(&self, token: &LocalChangeToken) -> Result<(), StorageError> {
        let mut tx = self.begin_transaction().await?;
        if let Err(e) = tx.delete_changes(token).await {
            tx.rollback().await?;
            return Err(e);
        }
        tx.commit().await
    }

    /// Returns the name of this backend for logging.
    fn backend_name(&self) -> &'static str;
}

/// A transaction for writing consolidation results atomically.
///
/// Operations are buffered until [`commit`](Self::commit); nothing is visible
/// to other readers before that, and [`rollback`](Self::rollback) discards
/// everything.
#[async_trait]
pub trait ChangeLogTransaction: Send + Sync {
    /// Removes the journal rows covered by `token`.
    async fn delete_changes(&mut self, token: &LocalChangeToken) -> Result<(), StorageError>;

    /// Records the server-confirmed identity of a resource.
    ///
    /// Stores the version, lastUpdated and synced snapshot, rebases the base
    /// version of the resource's still-pending rows and, when the server
    /// assigned a different id, renames the resource and rewrites references
    /// to it in every other resource and pending payload.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the resource is unknown locally.
    /// Returns `StorageError::AlreadyExists` if the server id is already taken.
    async fn update_resource_id_and_version(
        &mut self,
        update: ResourceIdentityUpdate,
    ) -> Result<(), StorageError>;

    /// Applies all buffered operations.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discards all buffered operations.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
