//! Writing upload results back into local storage.
//!
//! Every mapping of a success is consolidated in its own transaction: the
//! uploaded journal rows are removed and the server identity (version,
//! lastUpdated, snapshot and possibly a new id) is recorded. Both happen or
//! neither does.

use async_trait::async_trait;
use octofhir_sync_core::change_log::apply_patch;
use octofhir_sync_core::reference::{FhirReference, parse_reference};
use octofhir_sync_core::{ChangeType, DynDatabase, ResourceIdentityUpdate, StorageError};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::RequestConfig;
use crate::error::UploadError;
use crate::request::HttpVerb;
use crate::uploader::{ResourceUploadResponseMapping, UploadFailure, UploadSuccess};

/// Result of consolidating one [`UploadSuccess`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationOutcome {
    /// True if at least one resource was renamed to a server-assigned id.
    pub renamed: bool,
}

#[async_trait]
pub trait ResourceConsolidator: Send + Sync {
    /// Consolidates every mapping of `success`.
    ///
    /// On error, mappings consolidated before the failing one stay applied; the
    /// failure carries the local changes that are still pending.
    async fn consolidate(
        &self,
        success: &UploadSuccess,
    ) -> Result<ConsolidationOutcome, UploadFailure>;
}

/// Keeps local ids; the server is expected to honour client-assigned ids.
pub struct DefaultResourceConsolidator {
    db: DynDatabase,
}

impl DefaultResourceConsolidator {
    pub fn new(db: DynDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResourceConsolidator for DefaultResourceConsolidator {
    async fn consolidate(
        &self,
        success: &UploadSuccess,
    ) -> Result<ConsolidationOutcome, UploadFailure> {
        consolidate_all(&self.db, success, false).await
    }
}

/// Adopts the ids a server assigns to resources created with POST.
pub struct PostPerResourceUrlConsolidator {
    db: DynDatabase,
}

impl PostPerResourceUrlConsolidator {
    pub fn new(db: DynDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResourceConsolidator for PostPerResourceUrlConsolidator {
    async fn consolidate(
        &self,
        success: &UploadSuccess,
    ) -> Result<ConsolidationOutcome, UploadFailure> {
        consolidate_all(&self.db, success, true).await
    }
}

/// Builds the consolidator matching the request shape.
pub fn resource_consolidator(
    config: &RequestConfig,
    db: DynDatabase,
) -> Box<dyn ResourceConsolidator> {
    match config {
        RequestConfig::Url {
            create_verb: HttpVerb::Post,
            ..
        } => Box::new(PostPerResourceUrlConsolidator::new(db)),
        _ => Box::new(DefaultResourceConsolidator::new(db)),
    }
}

async fn consolidate_all(
    db: &DynDatabase,
    success: &UploadSuccess,
    adopt_server_ids: bool,
) -> Result<ConsolidationOutcome, UploadFailure> {
    let mut outcome = ConsolidationOutcome::default();
    for (i, mapping) in success.mappings.iter().enumerate() {
        match consolidate_one(db, mapping, adopt_server_ids).await {
            Ok(renamed) => outcome.renamed |= renamed,
            Err(e) => {
                let change = &mapping.local_change;
                tracing::error!(
                    resource_type = %change.resource_type,
                    id = %change.resource_id,
                    error = %e,
                    category = ?e.category(),
                    "Failed to consolidate uploaded change"
                );
                return Err(UploadFailure {
                    error: UploadError::consolidation(e.to_string()),
                    local_changes: success.mappings[i..]
                        .iter()
                        .map(|m| m.local_change.clone())
                        .collect(),
                });
            }
        }
    }
    Ok(outcome)
}

async fn consolidate_one(
    db: &DynDatabase,
    mapping: &ResourceUploadResponseMapping,
    adopt_server_ids: bool,
) -> Result<bool, StorageError> {
    let change = &mapping.local_change;
    let update = if change.change_type == ChangeType::Delete {
        None
    } else {
        Some(identity_update(db, mapping, adopt_server_ids).await?)
    };
    let renamed = update.as_ref().is_some_and(ResourceIdentityUpdate::is_renamed);

    let mut tx = db.begin_transaction().await?;
    let applied = async {
        tx.delete_changes(&change.token).await?;
        if let Some(update) = update {
            tx.update_resource_id_and_version(update).await?;
        }
        Ok::<_, StorageError>(())
    }
    .await;
    match applied {
        Ok(()) => tx.commit().await?,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            return Err(e);
        }
    }

    tracing::debug!(
        resource_type = %change.resource_type,
        id = %change.resource_id,
        token = %change.token,
        renamed,
        "Consolidated uploaded change"
    );
    Ok(renamed)
}

async fn identity_update(
    db: &DynDatabase,
    mapping: &ResourceUploadResponseMapping,
    adopt_server_ids: bool,
) -> Result<ResourceIdentityUpdate, StorageError> {
    let change = &mapping.local_change;
    let output = mapping.output.as_ref();
    let response = mapping.response.as_ref();

    let server_id = output
        .and_then(|o| o.get("id"))
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| {
            response
                .and_then(|r| r.location.as_deref())
                .and_then(location_reference)
                .map(|r| r.id)
        });
    let mut update = ResourceIdentityUpdate::new(&change.resource_type, &change.resource_id);
    match server_id {
        Some(id) if id != change.resource_id => {
            if adopt_server_ids {
                update = update.with_server_id(id);
            } else {
                tracing::warn!(
                    resource_type = %change.resource_type,
                    local_id = %change.resource_id,
                    server_id = %id,
                    "Server returned a different id; keeping the local one"
                );
            }
        }
        _ => {}
    }

    let meta = output.and_then(|o| o.get("meta"));
    let version = meta
        .and_then(|m| m.get("versionId"))
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| response.and_then(|r| r.etag.as_deref()).and_then(version_from_etag))
        .or_else(|| {
            response
                .and_then(|r| r.location.as_deref())
                .and_then(location_reference)
                .and_then(|r| r.version)
        });
    let last_updated = meta
        .and_then(|m| m.get("lastUpdated"))
        .and_then(Value::as_str)
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .or_else(|| response.and_then(|r| r.last_modified));

    let snapshot = match output {
        Some(resource) => Some(resource.clone()),
        None => match change.change_type {
            ChangeType::Insert => Some(change.payload.clone()),
            _ => {
                let base = db
                    .synced_snapshot(&change.resource_type, &change.resource_id)
                    .await?;
                base.and_then(|mut base| {
                    apply_patch(&mut base, &change.payload).ok().map(|()| base)
                })
            }
        },
    };

    Ok(update
        .with_version(version)
        .with_last_updated(last_updated)
        .with_snapshot(snapshot))
}

/// Parses the trailing `Type/id[/_history/v]` of a Location, absolute or not.
fn location_reference(location: &str) -> Option<FhirReference> {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    let start = match segments.iter().rposition(|s| *s == "_history") {
        Some(h) => h.checked_sub(2)?,
        None => segments.len().checked_sub(2)?,
    };
    parse_reference(&segments[start..].join("/")).ok()
}

/// Extracts the version from an ETag such as `W/"3"`.
fn version_from_etag(etag: &str) -> Option<String> {
    let value = etag.trim().trim_start_matches("W/").trim_matches('"');
    (!value.is_empty()).then(|| value.to_string())
}
