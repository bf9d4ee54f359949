//! Implementation of the `Database` capability for `MemoryDatabase`.

use std::sync::Arc;

use async_trait::async_trait;
use octofhir_sync_core::reference::rewrite_references;
use octofhir_sync_core::{
    ChangeLogTransaction, Database, LocalChange, LocalChangeToken, ResourceIdentityUpdate,
    StorageError,
};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::storage::{MemoryDatabase, StoreState, make_storage_key};

#[async_trait]
impl Database for MemoryDatabase {
    async fn get_all_local_changes(&self) -> Result<Vec<LocalChange>, StorageError> {
        let state = self.state.read().await;
        Ok(state.journal.values().cloned().map(LocalChange::from).collect())
    }

    async fn get_local_changes(
        &self,
        token: &LocalChangeToken,
    ) -> Result<Vec<LocalChange>, StorageError> {
        let state = self.state.read().await;
        Ok(token
            .ids()
            .iter()
            .filter_map(|id| state.journal.get(id))
            .cloned()
            .map(LocalChange::from)
            .collect())
    }

    async fn local_changes_count(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().await.journal.len())
    }

    async fn pending_resource_count(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().await.pending_resources().len())
    }

    async fn synced_snapshot(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<Value>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .resources
            .get(&make_storage_key(resource_type, id))
            .and_then(|row| row.synced.clone()))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn ChangeLogTransaction>, StorageError> {
        Ok(Box::new(MemoryChangeLogTransaction::new(self.state.clone())))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

/// In-memory transaction.
///
/// Operations are collected and applied on commit against a copy of the
/// store, which replaces the live state only if every operation succeeded.
pub struct MemoryChangeLogTransaction {
    state: Arc<RwLock<StoreState>>,
    operations: Vec<TransactionOp>,
}

enum TransactionOp {
    DeleteChanges(LocalChangeToken),
    UpdateIdentity(ResourceIdentityUpdate),
}

impl MemoryChangeLogTransaction {
    fn new(state: Arc<RwLock<StoreState>>) -> Self {
        Self {
            state,
            operations: Vec::new(),
        }
    }
}

#[async_trait]
impl ChangeLogTransaction for MemoryChangeLogTransaction {
    async fn delete_changes(&mut self, token: &LocalChangeToken) -> Result<(), StorageError> {
        self.operations
            .push(TransactionOp::DeleteChanges(token.clone()));
        Ok(())
    }

    async fn update_resource_id_and_version(
        &mut self,
        update: ResourceIdentityUpdate,
    ) -> Result<(), StorageError> {
        {
            let state = self.state.read().await;
            let key = make_storage_key(&update.resource_type, &update.local_id);
            if !state.resources.contains_key(&key) {
                return Err(StorageError::not_found(
                    &update.resource_type,
                    &update.local_id,
                ));
            }
        }
        self.operations.push(TransactionOp::UpdateIdentity(update));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut guard = self.state.write().await;
        let mut staged = guard.clone();
        for op in self.operations {
            match op {
                TransactionOp::DeleteChanges(token) => delete_changes(&mut staged, &token),
                TransactionOp::UpdateIdentity(update) => apply_identity(&mut staged, update)?,
            }
        }
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

fn delete_changes(state: &mut StoreState, token: &LocalChangeToken) {
    for id in token.ids() {
        state.journal.remove(id);
    }
    tracing::debug!(token = %token, "Cleared journal entries");
}

fn apply_identity(state: &mut StoreState, update: ResourceIdentityUpdate) -> Result<(), StorageError> {
    let ResourceIdentityUpdate {
        resource_type,
        local_id,
        server_id,
        version_id,
        last_updated,
        snapshot,
    } = update;

    let old_key = make_storage_key(&resource_type, &local_id);
    let new_key = make_storage_key(&resource_type, &server_id);
    if old_key != new_key && state.resources.contains_key(&new_key) {
        return Err(StorageError::already_exists(&resource_type, &server_id));
    }
    let mut row = state
        .resources
        .remove(&old_key)
        .ok_or_else(|| StorageError::not_found(&resource_type, &local_id))?;

    row.version_id = version_id.clone();
    if last_updated.is_some() {
        row.last_updated = last_updated;
    }
    if snapshot.is_some() {
        row.synced = snapshot;
    }

    // Edits made after the uploaded ones are now based on the new version.
    for entry in state
        .journal
        .values_mut()
        .filter(|e| e.resource_type == resource_type && e.resource_id == local_id)
    {
        entry.version_id = version_id.clone();
    }

    if old_key != new_key {
        tracing::info!(
            resource_type = %resource_type,
            local_id = %local_id,
            server_id = %server_id,
            "Adopting server-assigned resource id"
        );
        set_id(row.resource.as_mut(), &server_id);
        set_id(row.synced.as_mut(), &server_id);

        for entry in state
            .journal
            .values_mut()
            .filter(|e| e.resource_type == resource_type && e.resource_id == local_id)
        {
            entry.resource_id = server_id.clone();
            if entry.payload.is_object() {
                set_id(Some(&mut entry.payload), &server_id);
            }
        }

        let from = format!("{resource_type}/{local_id}");
        let to = format!("{resource_type}/{server_id}");
        let mut rewritten = 0;
        if let Some(resource) = row.resource.as_mut() {
            rewritten += rewrite_references(resource, &from, &to);
        }
        for other in state.resources.values_mut() {
            if let Some(resource) = other.resource.as_mut() {
                rewritten += rewrite_references(resource, &from, &to);
            }
        }
        for entry in state.journal.values_mut() {
            rewritten += rewrite_references(&mut entry.payload, &from, &to);
        }
        tracing::debug!(from = %from, to = %to, rewritten, "Rewrote references");
    }

    state.resources.insert(new_key, row);
    Ok(())
}

fn set_id(resource: Option<&mut Value>, id: &str) {
    if let Some(obj) = resource.and_then(Value::as_object_mut) {
        obj.insert("id".to_string(), Value::String(id.to_string()));
    }
}
