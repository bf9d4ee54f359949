use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use octofhir_sync_core::{ChangeType, LocalChange};
use serde_json::{Map, Value, json};

use super::{
    BundleUploadRequest, HttpVerb, JSON_PATCH_CONTENT_TYPE, UploadRequest, UploadRequestGenerator,
    if_match,
};
use crate::error::{SyncError, SyncResult};

/// Packs local changes into transaction bundles of at most `bundle_size` entries.
#[derive(Debug, Clone)]
pub struct BundleRequestGenerator {
    create_verb: HttpVerb,
    update_verb: HttpVerb,
    bundle_size: usize,
    use_etag: bool,
}

impl BundleRequestGenerator {
    /// Creates a generator. Creation must use PUT and update must use PATCH.
    pub fn new(
        create_verb: HttpVerb,
        update_verb: HttpVerb,
        bundle_size: usize,
        use_etag: bool,
    ) -> SyncResult<Self> {
        if create_verb != HttpVerb::Put {
            return Err(SyncError::unsupported_create_verb(create_verb));
        }
        if update_verb != HttpVerb::Patch {
            return Err(SyncError::unsupported_update_verb(update_verb));
        }
        if bundle_size == 0 {
            return Err(SyncError::config("bundle size must be > 0"));
        }
        Ok(Self {
            create_verb,
            update_verb,
            bundle_size,
            use_etag,
        })
    }

    fn entry(&self, change: &LocalChange) -> SyncResult<Value> {
        let url = change.reference();
        let (method, resource) = match change.change_type {
            ChangeType::Insert => (self.create_verb, Some(change.payload.clone())),
            ChangeType::Update => {
                let patch = serde_json::to_vec(&change.payload)?;
                let binary = json!({
                    "resourceType": "Binary",
                    "contentType": JSON_PATCH_CONTENT_TYPE,
                    "data": STANDARD.encode(patch),
                });
                (self.update_verb, Some(binary))
            }
            ChangeType::Delete => (HttpVerb::Delete, None),
        };

        let mut request = Map::new();
        request.insert("method".into(), Value::String(method.to_string()));
        request.insert("url".into(), Value::String(url.clone()));
        if let Some(etag) = if_match(change, self.use_etag) {
            request.insert("ifMatch".into(), Value::String(etag));
        }

        let mut entry = Map::new();
        entry.insert("fullUrl".into(), Value::String(url));
        if let Some(resource) = resource {
            entry.insert("resource".into(), resource);
        }
        entry.insert("request".into(), Value::Object(request));
        Ok(Value::Object(entry))
    }
}

impl UploadRequestGenerator for BundleRequestGenerator {
    fn generate(&self, changes: Vec<LocalChange>) -> SyncResult<Vec<UploadRequest>> {
        changes
            .chunks(self.bundle_size)
            .map(|chunk| {
                let entries = chunk
                    .iter()
                    .map(|change| self.entry(change))
                    .collect::<SyncResult<Vec<_>>>()?;
                let bundle = json!({
                    "resourceType": "Bundle",
                    "type": "transaction",
                    "entry": entries,
                });
                Ok(UploadRequest::Bundle(BundleUploadRequest {
                    bundle,
                    local_changes: chunk.to_vec(),
                }))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use octofhir_sync_core::LocalChangeToken;
    use time::OffsetDateTime;

    fn change(id: &str, change_type: ChangeType, payload: Value, version: Option<&str>) -> LocalChange {
        LocalChange {
            resource_type: "Patient".into(),
            resource_id: id.into(),
            change_type,
            payload,
            version_id: version.map(String::from),
            timestamp: OffsetDateTime::now_utc(),
            token: LocalChangeToken::single(1),
        }
    }

    fn generator(size: usize) -> BundleRequestGenerator {
        BundleRequestGenerator::new(HttpVerb::Put, HttpVerb::Patch, size, true).unwrap()
    }

    #[test]
    fn test_rejects_unsupported_verbs() {
        let err = BundleRequestGenerator::new(HttpVerb::Post, HttpVerb::Patch, 10, true).unwrap_err();
        assert_eq!(err.to_string(), "Creation using POST is not supported.");
        let err = BundleRequestGenerator::new(HttpVerb::Put, HttpVerb::Put, 10, true).unwrap_err();
        assert_eq!(err.to_string(), "Update using PUT is not supported.");
    }

    #[test]
    fn test_empty_input_yields_no_requests() {
        assert!(generator(10).generate(vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_bundle_shape() {
        let patch = json!([{"op": "replace", "path": "/active", "value": false}]);
        let changes = vec![
            change("p1", ChangeType::Insert, json!({"resourceType": "Patient", "id": "p1"}), None),
            change("p2", ChangeType::Update, patch.clone(), Some("2")),
            change("p3", ChangeType::Delete, json!({"resourceType": "Patient", "id": "p3"}), Some("")),
        ];
        let requests = generator(10).generate(changes).unwrap();
        assert_eq!(requests.len(), 1);
        let UploadRequest::Bundle(request) = &requests[0] else {
            panic!("expected a bundle request");
        };
        assert_eq!(request.local_changes.len(), 3);

        let encoded = STANDARD.encode(serde_json::to_vec(&patch).unwrap());
        assert_json_eq!(
            request.bundle,
            json!({
                "resourceType": "Bundle",
                "type": "transaction",
                "entry": [
                    {
                        "fullUrl": "Patient/p1",
                        "resource": {"resourceType": "Patient", "id": "p1"},
                        "request": {"method": "PUT", "url": "Patient/p1"}
                    },
                    {
                        "fullUrl": "Patient/p2",
                        "resource": {
                            "resourceType": "Binary",
                            "contentType": "application/json-patch+json",
                            "data": encoded
                        },
                        "request": {"method": "PATCH", "url": "Patient/p2", "ifMatch": "W/\"2\""}
                    },
                    {
                        "fullUrl": "Patient/p3",
                        "request": {"method": "DELETE", "url": "Patient/p3"}
                    }
                ]
            })
        );
    }

    #[test]
    fn test_etag_disabled() {
        let generator =
            BundleRequestGenerator::new(HttpVerb::Put, HttpVerb::Patch, 10, false).unwrap();
        let requests = generator
            .generate(vec![change("p1", ChangeType::Update, json!([]), Some("7"))])
            .unwrap();
        let UploadRequest::Bundle(request) = &requests[0] else {
            panic!("expected a bundle request");
        };
        assert!(request.bundle["entry"][0]["request"].get("ifMatch").is_none());
    }

    #[test]
    fn test_splits_by_bundle_size() {
        let changes: Vec<_> = (0..5)
            .map(|i| {
                change(
                    &format!("p{i}"),
                    ChangeType::Insert,
                    json!({"resourceType": "Patient", "id": format!("p{i}")}),
                    None,
                )
            })
            .collect();
        let requests = generator(2).generate(changes).unwrap();
        let sizes: Vec<_> = requests.iter().map(|r| r.local_changes().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
