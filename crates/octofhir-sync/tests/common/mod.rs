#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use octofhir_sync::{
    BundleUploadRequest, DataSource, DataSourceError, HttpVerb, UrlUploadRequest,
};
use octofhir_sync_core::{ChangeType, DynDatabase, LocalChange};
use octofhir_sync_memory::MemoryDatabase;
use serde_json::{Value, json};

/// What the mock server received, in call order.
#[derive(Debug, Clone)]
pub enum Received {
    Bundle(BundleUploadRequest),
    Url(UrlUploadRequest),
}

/// A scripted FHIR server.
///
/// Unless a call index has a scripted response, bundles get a matching
/// transaction-response (created resources at version "1", patched ones with
/// an etag of version "2" and no body) and URL requests echo the resource
/// with version "1".
/// POST creations are answered with the id `srv-<local id>`.
#[derive(Default)]
pub struct MockDataSource {
    received: Mutex<Vec<Received>>,
    scripted: Mutex<HashMap<usize, Result<Value, DataSourceError>>>,
}

impl MockDataSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers the `call`-th request (0-based) with `response`.
    pub fn respond_on(&self, call: usize, response: Result<Value, DataSourceError>) {
        self.scripted.lock().unwrap().insert(call, response);
    }

    pub fn refuse_connection_on(&self, call: usize) {
        self.respond_on(
            call,
            Err(DataSourceError::Connection {
                message: "connection refused".into(),
            }),
        );
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    fn record(&self, request: Received) -> Option<Result<Value, DataSourceError>> {
        let mut received = self.received.lock().unwrap();
        let call = received.len();
        received.push(request);
        self.scripted.lock().unwrap().remove(&call)
    }
}

pub fn server_copy(change: &LocalChange, id: &str) -> Value {
    let mut resource = match change.change_type {
        ChangeType::Insert => change.payload.clone(),
        _ => json!({"resourceType": change.resource_type}),
    };
    resource["id"] = json!(id);
    resource["meta"] = json!({"versionId": "1", "lastUpdated": "2024-05-01T10:00:00Z"});
    resource
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn post_bundle(&self, request: &BundleUploadRequest) -> Result<Value, DataSourceError> {
        if let Some(scripted) = self.record(Received::Bundle(request.clone())) {
            return scripted;
        }
        let entries: Vec<Value> = request
            .local_changes
            .iter()
            .map(|change| match change.change_type {
                ChangeType::Delete => json!({"response": {"status": "204 No Content"}}),
                ChangeType::Update => json!({
                    "response": {
                        "status": "200 OK",
                        "location": format!("{}/_history/2", change.reference()),
                        "etag": "W/\"2\""
                    }
                }),
                ChangeType::Insert => json!({
                    "resource": server_copy(change, &change.resource_id),
                    "response": {
                        "status": "200 OK",
                        "location": format!("{}/_history/1", change.reference()),
                        "etag": "W/\"1\""
                    }
                }),
            })
            .collect();
        Ok(json!({
            "resourceType": "Bundle",
            "type": "transaction-response",
            "entry": entries
        }))
    }

    async fn execute_url_request(
        &self,
        request: &UrlUploadRequest,
    ) -> Result<Value, DataSourceError> {
        if let Some(scripted) = self.record(Received::Url(request.clone())) {
            return scripted;
        }
        let change = &request.local_change;
        Ok(match request.method {
            HttpVerb::Delete => Value::Null,
            HttpVerb::Post => server_copy(change, &format!("srv-{}", change.resource_id)),
            _ => server_copy(change, &change.resource_id),
        })
    }
}

/// Returns the database both as its concrete type and as the engine's trait object.
pub fn shared(db: MemoryDatabase) -> (Arc<MemoryDatabase>, DynDatabase) {
    let db = Arc::new(db);
    let dyn_db: DynDatabase = db.clone();
    (db, dyn_db)
}
