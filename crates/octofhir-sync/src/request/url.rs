use std::collections::BTreeMap;

use octofhir_sync_core::{ChangeType, LocalChange};

use super::{
    HttpVerb, JSON_PATCH_CONTENT_TYPE, UploadRequest, UploadRequestGenerator, UrlUploadRequest,
    if_match,
};
use crate::error::{SyncError, SyncResult};

/// Emits one standalone request per local change.
#[derive(Debug, Clone)]
pub struct UrlRequestGenerator {
    create_verb: HttpVerb,
    update_verb: HttpVerb,
    use_etag: bool,
}

impl UrlRequestGenerator {
    /// Creates a generator. Creation may use PUT or POST; update must use PATCH.
    pub fn new(create_verb: HttpVerb, update_verb: HttpVerb, use_etag: bool) -> SyncResult<Self> {
        if !matches!(create_verb, HttpVerb::Put | HttpVerb::Post) {
            return Err(SyncError::unsupported_create_verb(create_verb));
        }
        if update_verb != HttpVerb::Patch {
            return Err(SyncError::unsupported_update_verb(update_verb));
        }
        Ok(Self {
            create_verb,
            update_verb,
            use_etag,
        })
    }

    fn request(&self, change: LocalChange) -> UrlUploadRequest {
        let mut headers = BTreeMap::new();
        let (method, url, body) = match change.change_type {
            ChangeType::Insert => {
                let url = match self.create_verb {
                    HttpVerb::Post => change.resource_type.clone(),
                    _ => change.reference(),
                };
                (self.create_verb, url, Some(change.payload.clone()))
            }
            ChangeType::Update => {
                headers.insert("Content-Type".to_string(), JSON_PATCH_CONTENT_TYPE.to_string());
                (self.update_verb, change.reference(), Some(change.payload.clone()))
            }
            ChangeType::Delete => (HttpVerb::Delete, change.reference(), None),
        };
        if let Some(etag) = if_match(&change, self.use_etag) {
            headers.insert("If-Match".to_string(), etag);
        }
        UrlUploadRequest {
            method,
            url,
            body,
            headers,
            local_change: change,
        }
    }
}

impl UploadRequestGenerator for UrlRequestGenerator {
    fn generate(&self, changes: Vec<LocalChange>) -> SyncResult<Vec<UploadRequest>> {
        Ok(changes
            .into_iter()
            .map(|change| UploadRequest::Url(self.request(change)))
            .collect())
    }
}
