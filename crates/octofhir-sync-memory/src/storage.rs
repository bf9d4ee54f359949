//! In-memory resource rows and journal, with the local-edit writer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use octofhir_sync_core::change_log::{diff_resources, is_empty_patch, resource_identity, validate_append};
use octofhir_sync_core::id::generate_id;
use octofhir_sync_core::{ChangeLogEntry, ChangeType, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::RwLock;

pub type StorageKey = String; // Format: "ResourceType/id"

pub(crate) fn make_storage_key(resource_type: &str, id: &str) -> StorageKey {
    format!("{resource_type}/{id}")
}

/// Local state of one resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ResourceRow {
    /// Current local body; `None` once deleted locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    /// Last server-confirmed version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Last server-confirmed lastUpdated.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
    /// Last server-confirmed body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced: Option<Value>,
}

impl ResourceRow {
    pub(crate) fn is_live(&self) -> bool {
        self.resource.is_some()
    }
}

/// Everything the backend stores. Cloned wholesale to stage a transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub resources: BTreeMap<StorageKey, ResourceRow>,
    pub journal: BTreeMap<i64, ChangeLogEntry>,
}

impl StoreState {
    pub(crate) fn last_pending_type(&self, resource_type: &str, id: &str) -> Option<ChangeType> {
        self.journal
            .values()
            .rev()
            .find(|e| e.resource_type == resource_type && e.resource_id == id)
            .map(|e| e.change_type)
    }

    pub(crate) fn pending_resources(&self) -> BTreeSet<(&str, &str)> {
        self.journal
            .values()
            .map(|e| (e.resource_type.as_str(), e.resource_id.as_str()))
            .collect()
    }

    fn max_change_id(&self) -> i64 {
        self.journal.keys().next_back().copied().unwrap_or(0)
    }
}

/// In-memory change-log backend.
///
/// This backend provides:
/// - A local-edit writer (`insert`, `update`, `delete`) that journals every mutation
/// - The `Database` capability consumed by the upload engine
/// - Optional persistence to a JSON file
#[derive(Debug)]
pub struct MemoryDatabase {
    pub(crate) state: Arc<RwLock<StoreState>>,
    /// Atomic counter for journal entry ids
    pub(crate) change_counter: AtomicI64,
    path: Option<PathBuf>,
}

impl MemoryDatabase {
    /// Creates a new, empty, non-persistent store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            change_counter: AtomicI64::new(1),
            path: None,
        }
    }

    /// Opens a store backed by a JSON file, loading it when it exists.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<StoreState>(&bytes).map_err(|e| {
                StorageError::internal(format!("Corrupt store file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => {
                return Err(StorageError::connection_error(format!(
                    "Cannot read store file {}: {e}",
                    path.display()
                )));
            }
        };
        tracing::debug!(
            path = %path.display(),
            resources = state.resources.len(),
            pending = state.journal.len(),
            "Opened change log store"
        );
        Ok(Self {
            change_counter: AtomicI64::new(state.max_change_id() + 1),
            state: Arc::new(RwLock::new(state)),
            path: Some(path),
        })
    }

    /// Returns the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes the store to its backing file. No-op for non-persistent stores.
    pub async fn save(&self) -> StorageResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&*state)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::connection_error(e.to_string()))?;
        }
        tokio::fs::write(path, bytes).await.map_err(|e| {
            StorageError::connection_error(format!("Cannot write store file {}: {e}", path.display()))
        })
    }

    fn next_change_id(&self) -> i64 {
        self.change_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn new_entry(
        &self,
        resource_type: &str,
        id: &str,
        change_type: ChangeType,
        payload: Value,
        version_id: Option<String>,
    ) -> ChangeLogEntry {
        ChangeLogEntry {
            id: self.next_change_id(),
            resource_type: resource_type.to_string(),
            resource_id: id.to_string(),
            change_type,
            payload,
            version_id,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Creates a resource locally and journals an INSERT.
    ///
    /// A missing `id` is generated. Returns the resource id.
    pub async fn insert(&self, mut resource: Value) -> StorageResult<String> {
        let has_id = resource
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty());
        if !has_id {
            let obj = resource
                .as_object_mut()
                .ok_or_else(|| StorageError::invalid_resource("Resource must be a JSON object"))?;
            obj.insert("id".to_string(), Value::String(generate_id()));
        }
        let (resource_type, id) = resource_identity(&resource)?;
        let key = make_storage_key(&resource_type, &id);

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let last = state.last_pending_type(&resource_type, &id);
        validate_append(&resource_type, &id, last, ChangeType::Insert)?;
        if state.resources.get(&key).is_some_and(ResourceRow::is_live) {
            return Err(StorageError::already_exists(&resource_type, &id));
        }

        let row = state.resources.entry(key).or_default();
        row.resource = Some(resource.clone());
        let entry = self.new_entry(
            &resource_type,
            &id,
            ChangeType::Insert,
            resource,
            row.version_id.clone(),
        );
        tracing::debug!(resource_type = %resource_type, id = %id, change_id = entry.id, "Journaled INSERT");
        state.journal.insert(entry.id, entry);
        Ok(id)
    }

    /// Replaces a resource locally and journals an UPDATE holding the diff.
    ///
    /// Returns the journal id, or `None` when the resource did not change.
    pub async fn update(&self, resource: Value) -> StorageResult<Option<i64>> {
        let (resource_type, id) = resource_identity(&resource)?;
        let key = make_storage_key(&resource_type, &id);

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let last = state.last_pending_type(&resource_type, &id);
        validate_append(&resource_type, &id, last, ChangeType::Update)?;

        let row = state
            .resources
            .get_mut(&key)
            .ok_or_else(|| StorageError::not_found(&resource_type, &id))?;
        let diff = match row.resource.as_ref() {
            Some(old) => diff_resources(old, &resource)?,
            None => return Err(StorageError::not_found(&resource_type, &id)),
        };
        if is_empty_patch(&diff) {
            tracing::warn!(resource_type = %resource_type, id = %id, "Update produced no changes; nothing journaled");
            return Ok(None);
        }

        row.resource = Some(resource);
        let entry = self.new_entry(
            &resource_type,
            &id,
            ChangeType::Update,
            diff,
            row.version_id.clone(),
        );
        let change_id = entry.id;
        tracing::debug!(resource_type = %resource_type, id = %id, change_id, "Journaled UPDATE");
        state.journal.insert(change_id, entry);
        Ok(Some(change_id))
    }

    /// Deletes a resource locally and journals a DELETE. Returns the journal id.
    pub async fn delete(&self, resource_type: &str, id: &str) -> StorageResult<i64> {
        let key = make_storage_key(resource_type, id);

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let last = state.last_pending_type(resource_type, id);
        validate_append(resource_type, id, last, ChangeType::Delete)?;

        let row = state
            .resources
            .get_mut(&key)
            .ok_or_else(|| StorageError::not_found(resource_type, id))?;
        let payload = row
            .resource
            .take()
            .ok_or_else(|| StorageError::not_found(resource_type, id))?;
        let entry = self.new_entry(
            resource_type,
            id,
            ChangeType::Delete,
            payload,
            row.version_id.clone(),
        );
        let change_id = entry.id;
        tracing::debug!(resource_type = %resource_type, id = %id, change_id, "Journaled DELETE");
        state.journal.insert(change_id, entry);
        Ok(change_id)
    }

    /// Stores a resource as received from the server, without journaling.
    ///
    /// The body becomes both the local state and the synced snapshot; its
    /// `meta.versionId` and `meta.lastUpdated` are recorded.
    pub async fn insert_remote(&self, resource: Value) -> StorageResult<()> {
        let (resource_type, id) = resource_identity(&resource)?;
        let key = make_storage_key(&resource_type, &id);

        let mut state = self.state.write().await;
        if state.last_pending_type(&resource_type, &id).is_some() {
            return Err(StorageError::invalid_change(
                &resource_type,
                &id,
                "cannot overwrite a resource with pending local changes",
            ));
        }

        let meta = resource.get("meta");
        let version_id = meta
            .and_then(|m| m.get("versionId"))
            .and_then(Value::as_str)
            .map(String::from);
        let last_updated = meta
            .and_then(|m| m.get("lastUpdated"))
            .and_then(Value::as_str)
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok());

        state.resources.insert(
            key,
            ResourceRow {
                resource: Some(resource.clone()),
                version_id,
                last_updated,
                synced: Some(resource),
            },
        );
        Ok(())
    }

    /// Returns the current local body of a resource.
    pub async fn get_resource(&self, resource_type: &str, id: &str) -> Option<Value> {
        let state = self.state.read().await;
        state
            .resources
            .get(&make_storage_key(resource_type, id))
            .and_then(|row| row.resource.clone())
    }

    /// Returns the last server-confirmed version of a resource.
    pub async fn resource_version(&self, resource_type: &str, id: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .resources
            .get(&make_storage_key(resource_type, id))
            .and_then(|row| row.version_id.clone())
    }

    /// Returns the last server-confirmed lastUpdated of a resource.
    pub async fn resource_last_updated(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Option<OffsetDateTime> {
        let state = self.state.read().await;
        state
            .resources
            .get(&make_storage_key(resource_type, id))
            .and_then(|row| row.last_updated)
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient(id: &str, family: &str) -> Value {
        json!({"resourceType": "Patient", "id": id, "name": [{"family": family}]})
    }

    #[tokio::test]
    async fn test_insert_generates_id() {
        let db = MemoryDatabase::new();
        let id = db
            .insert(json!({"resourceType": "Patient", "active": true}))
            .await
            .unwrap();
        assert!(!id.is_empty());
        let stored = db.get_resource("Patient", &id).await.unwrap();
        assert_eq!(stored["id"], id.as_str());
    }

    #[tokio::test]
    async fn test_insert_twice_is_rejected() {
        let db = MemoryDatabase::new();
        db.insert(patient("p1", "Smith")).await.unwrap();
        let err = db.insert(patient("p1", "Smith")).await.unwrap_err();
        assert!(err.is_invalid_change());
    }

    #[tokio::test]
    async fn test_insert_over_synced_resource_is_rejected() {
        let db = MemoryDatabase::new();
        db.insert_remote(patient("p1", "Smith")).await.unwrap();
        let err = db.insert(patient("p1", "Smith")).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_journals_diff() {
        let db = MemoryDatabase::new();
        db.insert(json!({"resourceType": "Patient", "id": "p1", "active": false}))
            .await
            .unwrap();
        let change_id = db
            .update(json!({"resourceType": "Patient", "id": "p1", "active": true}))
            .await
            .unwrap();
        assert_eq!(change_id, Some(2));

        let state = db.state.read().await;
        let entry = &state.journal[&2];
        assert_eq!(entry.change_type, ChangeType::Update);
        assert_eq!(
            entry.payload,
            json!([{"op": "replace", "path": "/active", "value": true}])
        );
    }

    #[tokio::test]
    async fn test_noop_update_is_not_journaled() {
        let db = MemoryDatabase::new();
        db.insert(patient("p1", "Smith")).await.unwrap();
        assert_eq!(db.update(patient("p1", "Smith")).await.unwrap(), None);
        assert_eq!(db.state.read().await.journal.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_resource() {
        let db = MemoryDatabase::new();
        let err = db.update(patient("nope", "Smith")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_keeps_last_body() {
        let db = MemoryDatabase::new();
        db.insert(patient("p1", "Smith")).await.unwrap();
        let change_id = db.delete("Patient", "p1").await.unwrap();

        assert!(db.get_resource("Patient", "p1").await.is_none());
        let state = db.state.read().await;
        assert_eq!(state.journal[&change_id].payload, patient("p1", "Smith"));
        drop(state);

        let err = db.update(patient("p1", "Jones")).await.unwrap_err();
        assert!(err.is_invalid_change());
        let err = db.delete("Patient", "p1").await.unwrap_err();
        assert!(err.is_invalid_change());
    }

    #[tokio::test]
    async fn test_insert_remote_records_version() {
        let db = MemoryDatabase::new();
        db.insert_remote(json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"versionId": "4", "lastUpdated": "2024-01-01T00:00:00Z"}
        }))
        .await
        .unwrap();
        assert_eq!(db.resource_version("Patient", "p1").await, Some("4".to_string()));
        assert!(db.resource_last_updated("Patient", "p1").await.is_some());

        db.update(json!({"resourceType": "Patient", "id": "p1", "active": true}))
            .await
            .unwrap();
        let state = db.state.read().await;
        let entry = state.journal.values().next().unwrap();
        assert_eq!(entry.version_id, Some("4".to_string()));
    }
}
