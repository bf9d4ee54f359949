//! Change log types.
//!
//! This module defines the journal row ([`ChangeLogEntry`]), the transient
//! upload view derived from it ([`LocalChange`]) and the token that links the
//! two together across every layer of the upload pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use time::OffsetDateTime;

/// The kind of local mutation recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// The resource was created locally. Payload is the full resource.
    Insert,
    /// The resource was modified locally. Payload is an RFC 6902 patch.
    Update,
    /// The resource was deleted locally. Payload is the last full resource body.
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single row of the append-only journal of local mutations.
///
/// Entries for the same `(resource_type, resource_id)` are totally ordered by
/// `id`; replaying their payloads in that order reproduces the current local
/// state of the resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Monotonic identifier assigned when the entry is appended.
    pub id: i64,
    /// The FHIR resource type (e.g., "Patient").
    pub resource_type: String,
    /// The logical ID of the resource.
    pub resource_id: String,
    /// What kind of mutation this is.
    pub change_type: ChangeType,
    /// Full body for INSERT/DELETE, JSON patch array for UPDATE.
    pub payload: Value,
    /// The server version the edit was based on, if the resource is known remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// When the mutation happened.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ChangeLogEntry {
    /// Returns the `Type/id` reference of the resource this entry belongs to.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }
}

/// The set of journal entry identifiers a local change or upload request represents.
///
/// Ids are kept sorted and free of duplicates; the token is immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalChangeToken {
    ids: Vec<i64>,
}

impl LocalChangeToken {
    /// Creates a token from any collection of journal ids.
    #[must_use]
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// Creates a token covering a single journal entry.
    #[must_use]
    pub fn single(id: i64) -> Self {
        Self { ids: vec![id] }
    }

    /// Returns the journal ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Returns true if the given journal id is part of this token.
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Returns a new token covering the ids of both tokens.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.ids.iter().chain(other.ids.iter()).copied())
    }

    /// Returns the number of journal entries covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the token covers no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl fmt::Display for LocalChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.ids.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", ids.join(","))
    }
}

/// An upload-ready unit derived from one or more journal entries.
///
/// Read from the database it covers exactly one entry; after per-resource
/// squashing it covers every entry folded into it. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalChange {
    /// The FHIR resource type.
    pub resource_type: String,
    /// The logical ID of the resource.
    pub resource_id: String,
    /// The effective mutation type.
    pub change_type: ChangeType,
    /// Full body for INSERT/DELETE, JSON patch array for UPDATE.
    pub payload: Value,
    /// The server version the edits were based on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Timestamp of the latest journal entry folded into this change.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The journal entries this change represents.
    pub token: LocalChangeToken,
}

impl LocalChange {
    /// Returns the `Type/id` reference of the changed resource.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.resource_id)
    }

    /// Returns the base version when it is present and non-empty.
    #[must_use]
    pub fn base_version(&self) -> Option<&str> {
        self.version_id.as_deref().filter(|v| !v.is_empty())
    }
}

impl From<ChangeLogEntry> for LocalChange {
    fn from(entry: ChangeLogEntry) -> Self {
        Self {
            token: LocalChangeToken::single(entry.id),
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            change_type: entry.change_type,
            payload: entry.payload,
            version_id: entry.version_id,
            timestamp: entry.timestamp,
        }
    }
}

/// Server-confirmed identity of a resource, written back during consolidation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceIdentityUpdate {
    /// The FHIR resource type.
    pub resource_type: String,
    /// The id the resource has in local storage.
    pub local_id: String,
    /// The id the server knows the resource by. Differs from `local_id` only
    /// when the server assigned a new id on creation.
    pub server_id: String,
    /// The version the server assigned.
    pub version_id: Option<String>,
    /// The server's lastUpdated timestamp.
    pub last_updated: Option<OffsetDateTime>,
    /// The resource as the server now holds it, used as the base for later diffs.
    pub snapshot: Option<Value>,
}

impl ResourceIdentityUpdate {
    /// Creates an update that keeps the local id.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            resource_type: resource_type.into(),
            server_id: id.clone(),
            local_id: id,
            version_id: None,
            last_updated: None,
            snapshot: None,
        }
    }

    /// Sets the server-assigned id.
    #[must_use]
    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = server_id.into();
        self
    }

    /// Sets the server version.
    #[must_use]
    pub fn with_version(mut self, version_id: Option<String>) -> Self {
        self.version_id = version_id;
        self
    }

    /// Sets the lastUpdated timestamp.
    #[must_use]
    pub fn with_last_updated(mut self, last_updated: Option<OffsetDateTime>) -> Self {
        self.last_updated = last_updated;
        self
    }

    /// Sets the synced snapshot.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Option<Value>) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Returns true if the server assigned a different id.
    #[must_use]
    pub fn is_renamed(&self) -> bool {
        self.local_id != self.server_id
    }
}
