//! Upload request generation.
//!
//! A generator turns one chunk of local changes into concrete requests:
//! transaction bundles ([`BundleRequestGenerator`]) or one request per change
//! ([`UrlRequestGenerator`]). Unsupported verbs are rejected at construction,
//! before anything is sent.

mod bundle;
mod url;

use std::collections::BTreeMap;
use std::fmt;

use octofhir_sync_core::{LocalChange, LocalChangeToken};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RequestConfig;
use crate::error::SyncResult;

pub use bundle::BundleRequestGenerator;
pub use url::UrlRequestGenerator;

/// Content type of JSON patch bodies.
pub const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// HTTP methods used by upload requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction bundle and the local changes it carries, in entry order.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleUploadRequest {
    pub bundle: Value,
    pub local_changes: Vec<LocalChange>,
}

/// A single standalone request for one local change.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlUploadRequest {
    pub method: HttpVerb,
    /// Path relative to the server base, e.g. `Patient/123`.
    pub url: String,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub local_change: LocalChange,
}

/// A request ready to hand to a [`DataSource`](crate::DataSource).
#[derive(Debug, Clone, PartialEq)]
pub enum UploadRequest {
    Bundle(BundleUploadRequest),
    Url(UrlUploadRequest),
}

impl UploadRequest {
    /// Returns the local changes this request satisfies.
    pub fn local_changes(&self) -> &[LocalChange] {
        match self {
            Self::Bundle(request) => &request.local_changes,
            Self::Url(request) => std::slice::from_ref(&request.local_change),
        }
    }

    /// Returns the tokens of the local changes this request satisfies.
    pub fn tokens(&self) -> Vec<LocalChangeToken> {
        self.local_changes().iter().map(|c| c.token.clone()).collect()
    }
}

/// Turns a chunk of local changes into upload requests.
pub trait UploadRequestGenerator: Send + Sync {
    /// Returns zero requests for zero changes.
    fn generate(&self, changes: Vec<LocalChange>) -> SyncResult<Vec<UploadRequest>>;
}

/// Builds the generator selected by the configuration.
pub fn request_generator(
    config: &RequestConfig,
    use_etag: bool,
) -> SyncResult<Box<dyn UploadRequestGenerator>> {
    Ok(match config {
        RequestConfig::Bundle {
            create_verb,
            update_verb,
            max_bundle_size,
        } => Box::new(BundleRequestGenerator::new(
            *create_verb,
            *update_verb,
            *max_bundle_size,
            use_etag,
        )?),
        RequestConfig::Url {
            create_verb,
            update_verb,
        } => Box::new(UrlRequestGenerator::new(*create_verb, *update_verb, use_etag)?),
    })
}

/// Returns the weak ETag for a change's base version, if it should be sent.
pub(crate) fn if_match(change: &LocalChange, use_etag: bool) -> Option<String> {
    if !use_etag {
        return None;
    }
    change.base_version().map(|v| format!("W/\"{v}\""))
}
