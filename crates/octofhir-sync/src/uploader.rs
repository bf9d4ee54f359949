//! The uploader: sends requests one at a time and classifies every response.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use octofhir_sync_core::{ChangeType, LocalChange, LocalChangeToken};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::datasource::DataSource;
use crate::error::UploadError;
use crate::paginator::Paginator;
use crate::request::{
    BundleUploadRequest, HttpVerb, UploadRequest, UploadRequestGenerator, UrlUploadRequest,
};

/// The `response` element of a transaction-response entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryResponse {
    pub status: Option<String>,
    pub location: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<OffsetDateTime>,
}

impl EntryResponse {
    fn from_json(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(String::from);
        Self {
            status: text("status"),
            location: text("location"),
            etag: text("etag"),
            last_modified: value
                .get("lastModified")
                .and_then(Value::as_str)
                .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok()),
        }
    }
}

/// Pairs a local change with what the server returned for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUploadResponseMapping {
    pub local_change: LocalChange,
    /// The resource as stored by the server, when returned.
    pub output: Option<Value>,
    /// Entry metadata, for transaction responses.
    pub response: Option<EntryResponse>,
}

/// Which kind of request a success came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Bundle,
    Url(HttpVerb),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadSuccess {
    pub kind: RequestKind,
    pub mappings: Vec<ResourceUploadResponseMapping>,
}

impl UploadSuccess {
    pub fn tokens(&self) -> Vec<LocalChangeToken> {
        self.mappings
            .iter()
            .map(|m| m.local_change.token.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub error: UploadError,
    /// The local changes the failed request was meant to satisfy.
    pub local_changes: Vec<LocalChange>,
}

impl UploadFailure {
    pub fn tokens(&self) -> Vec<LocalChangeToken> {
        self.local_changes.iter().map(|c| c.token.clone()).collect()
    }
}

/// Events produced by one [`Uploader::upload`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    Started { total: usize },
    Progress { completed: usize, total: usize },
    Success(UploadSuccess),
    Failure(UploadFailure),
}

/// Drives request generation and the data source for one batch of changes.
#[derive(Clone)]
pub struct Uploader {
    data_source: Arc<dyn DataSource>,
    paginator: Arc<dyn Paginator>,
    request_generator: Arc<dyn UploadRequestGenerator>,
}

impl Uploader {
    pub fn new(
        data_source: Arc<dyn DataSource>,
        paginator: Arc<dyn Paginator>,
        request_generator: Arc<dyn UploadRequestGenerator>,
    ) -> Self {
        Self {
            data_source,
            paginator,
            request_generator,
        }
    }

    /// Uploads `changes`, yielding a lazy, single-pass sequence of events.
    ///
    /// `Started` comes first. Requests are sent strictly one after another;
    /// each yields `Success` followed by `Progress`, or `Failure`. A failure
    /// does not stop later requests; dropping the stream does, between requests.
    pub fn upload(&self, changes: Vec<LocalChange>) -> BoxStream<'static, UploadEvent> {
        let total = changes.len();
        let mut outbox = VecDeque::from([UploadEvent::Started { total }]);
        let mut requests = VecDeque::new();

        for page in self.paginator.page(changes) {
            match self.request_generator.generate(page.clone()) {
                Ok(generated) => requests.extend(generated),
                Err(e) => outbox.push_back(UploadEvent::Failure(UploadFailure {
                    error: e.into(),
                    local_changes: page,
                })),
            }
        }
        tracing::debug!(total, requests = requests.len(), "Prepared upload requests");

        let run = UploadRun {
            data_source: self.data_source.clone(),
            requests,
            outbox,
            completed: 0,
            total,
        };
        stream::unfold(run, |mut run| async move {
            loop {
                if let Some(event) = run.outbox.pop_front() {
                    return Some((event, run));
                }
                let request = run.requests.pop_front()?;
                let satisfied = request.local_changes().len();
                match execute(run.data_source.as_ref(), request).await {
                    UploadEvent::Success(success) => {
                        run.completed += satisfied;
                        run.outbox.push_back(UploadEvent::Success(success));
                        run.outbox.push_back(UploadEvent::Progress {
                            completed: run.completed,
                            total: run.total,
                        });
                    }
                    event => run.outbox.push_back(event),
                }
            }
        })
        .boxed()
    }
}

struct UploadRun {
    data_source: Arc<dyn DataSource>,
    requests: VecDeque<UploadRequest>,
    outbox: VecDeque<UploadEvent>,
    completed: usize,
    total: usize,
}

async fn execute(data_source: &dyn DataSource, request: UploadRequest) -> UploadEvent {
    match request {
        UploadRequest::Bundle(request) => {
            let response = data_source.post_bundle(&request).await;
            classify_bundle(request, response.map_err(UploadError::from))
        }
        UploadRequest::Url(request) => {
            let response = data_source.execute_url_request(&request).await;
            classify_url(request, response.map_err(UploadError::from))
        }
    }
}

#[tracing::instrument(skip_all, fields(changes = request.local_changes.len()))]
fn classify_bundle(
    request: BundleUploadRequest,
    response: Result<Value, UploadError>,
) -> UploadEvent {
    let checked = response.and_then(|body| {
        reject_operation_outcome(&body)?;
        let is_transaction_response = body.get("resourceType").and_then(Value::as_str)
            == Some("Bundle")
            && body.get("type").and_then(Value::as_str) == Some("transaction-response");
        if !is_transaction_response {
            return Err(UploadError::unexpected_response(
                "expected a transaction-response Bundle",
            ));
        }
        let entries = body
            .get("entry")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if entries.len() != request.local_changes.len() {
            return Err(UploadError::ResponseSizeMismatch {
                expected: request.local_changes.len(),
                actual: entries.len(),
            });
        }
        Ok(entries)
    });

    match checked {
        Ok(entries) => UploadEvent::Success(UploadSuccess {
            kind: RequestKind::Bundle,
            mappings: request
                .local_changes
                .into_iter()
                .zip(entries)
                .map(|(local_change, entry)| ResourceUploadResponseMapping {
                    local_change,
                    output: entry.get("resource").filter(|r| r.is_object()).cloned(),
                    response: entry.get("response").map(EntryResponse::from_json),
                })
                .collect(),
        }),
        Err(error) => {
            tracing::warn!(error = %error, "Bundle upload failed");
            UploadEvent::Failure(UploadFailure {
                error,
                local_changes: request.local_changes,
            })
        }
    }
}

#[tracing::instrument(skip_all, fields(method = %request.method, url = %request.url))]
fn classify_url(request: UrlUploadRequest, response: Result<Value, UploadError>) -> UploadEvent {
    let change = &request.local_change;
    let checked = response.and_then(|body| {
        if body.is_null() {
            return if change.change_type == ChangeType::Delete {
                Ok(None)
            } else {
                Err(UploadError::unexpected_response("empty response body"))
            };
        }
        reject_operation_outcome(&body)?;
        let resource_type = body.get("resourceType").and_then(Value::as_str);
        if resource_type != Some(change.resource_type.as_str()) {
            return Err(UploadError::unexpected_response(format!(
                "expected a {} resource, got {}",
                change.resource_type,
                resource_type.unwrap_or("no resourceType")
            )));
        }
        Ok(Some(body))
    });

    match checked {
        Ok(output) => UploadEvent::Success(UploadSuccess {
            kind: RequestKind::Url(request.method),
            mappings: vec![ResourceUploadResponseMapping {
                local_change: request.local_change,
                output,
                response: None,
            }],
        }),
        Err(error) => {
            tracing::warn!(error = %error, "Request failed");
            UploadEvent::Failure(UploadFailure {
                error,
                local_changes: vec![request.local_change],
            })
        }
    }
}

/// Any OperationOutcome, even one without issues, is a rejection.
fn reject_operation_outcome(body: &Value) -> Result<(), UploadError> {
    if body.get("resourceType").and_then(Value::as_str) != Some("OperationOutcome") {
        return Ok(());
    }
    let msgs: Vec<String> = body
        .get("issue")
        .and_then(Value::as_array)
        .map(|issues| {
            issues
                .iter()
                .filter_map(|i| {
                    i.get("diagnostics")
                        .or_else(|| i.get("details").and_then(|d| d.get("text")))
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default();
    let diagnostics = if msgs.is_empty() {
        "OperationOutcome without diagnostics".to_string()
    } else {
        msgs.join("; ")
    };
    Err(UploadError::ServerRejection { diagnostics })
}
