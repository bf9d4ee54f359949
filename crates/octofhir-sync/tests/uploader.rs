mod common;

use std::sync::Arc;

use common::MockDataSource;
use futures_util::StreamExt;
use octofhir_sync::{
    BundleRequestGenerator, HttpVerb, RequestKind, SizePaginator, UploadError, UploadEvent,
    Uploader, UrlRequestGenerator,
};
use octofhir_sync_core::{ChangeType, LocalChange, LocalChangeToken};
use serde_json::{Value, json};
use time::OffsetDateTime;

fn insert(id: &str, token: i64) -> LocalChange {
    LocalChange {
        resource_type: "Patient".into(),
        resource_id: id.into(),
        change_type: ChangeType::Insert,
        payload: json!({"resourceType": "Patient", "id": id}),
        version_id: None,
        timestamp: OffsetDateTime::now_utc(),
        token: LocalChangeToken::single(token),
    }
}

fn bundle_uploader(source: Arc<MockDataSource>, page_size: usize) -> Uploader {
    Uploader::new(
        source,
        Arc::new(SizePaginator::new(page_size)),
        Arc::new(BundleRequestGenerator::new(HttpVerb::Put, HttpVerb::Patch, 500, true).unwrap()),
    )
}

fn url_uploader(source: Arc<MockDataSource>) -> Uploader {
    Uploader::new(
        source,
        Arc::new(SizePaginator::new(500)),
        Arc::new(UrlRequestGenerator::new(HttpVerb::Put, HttpVerb::Patch, true).unwrap()),
    )
}

fn kinds(events: &[UploadEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            UploadEvent::Started { .. } => "started",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::Success(_) => "success",
            UploadEvent::Failure(_) => "failure",
        })
        .collect()
}

#[tokio::test]
async fn test_failure_does_not_stop_later_requests() {
    let source = MockDataSource::new();
    source.refuse_connection_on(0);
    let uploader = bundle_uploader(source.clone(), 1);

    let events: Vec<UploadEvent> = uploader
        .upload(vec![insert("a", 1), insert("b", 2), insert("c", 3)])
        .collect()
        .await;

    assert_eq!(
        kinds(&events),
        vec!["started", "failure", "success", "progress", "success", "progress"]
    );
    assert_eq!(events[0], UploadEvent::Started { total: 3 });
    let UploadEvent::Failure(failure) = &events[1] else {
        unreachable!()
    };
    assert!(failure.error.is_retryable());
    assert_eq!(failure.tokens(), vec![LocalChangeToken::single(1)]);
    assert_eq!(events[5], UploadEvent::Progress { completed: 2, total: 3 });
    assert_eq!(source.received().len(), 3);
}

#[tokio::test]
async fn test_bundle_success_maps_entries_by_position() {
    let source = MockDataSource::new();
    let uploader = bundle_uploader(source, 10);

    let events: Vec<UploadEvent> = uploader
        .upload(vec![insert("a", 1), insert("b", 2)])
        .collect()
        .await;

    let UploadEvent::Success(success) = &events[1] else {
        panic!("expected success, got {:?}", events[1]);
    };
    assert_eq!(success.kind, RequestKind::Bundle);
    assert_eq!(success.mappings.len(), 2);
    assert_eq!(success.mappings[1].local_change.resource_id, "b");
    assert_eq!(success.mappings[1].output.as_ref().unwrap()["id"], "b");
    let response = success.mappings[1].response.as_ref().unwrap();
    assert_eq!(response.etag.as_deref(), Some("W/\"1\""));
    assert_eq!(events[2], UploadEvent::Progress { completed: 2, total: 2 });
}

#[tokio::test]
async fn test_empty_input_sends_nothing() {
    let source = MockDataSource::new();
    let uploader = bundle_uploader(source.clone(), 1);

    let events: Vec<UploadEvent> = uploader.upload(Vec::new()).collect().await;

    assert_eq!(events, vec![UploadEvent::Started { total: 0 }]);
    assert!(source.received().is_empty());
}

#[tokio::test]
async fn test_non_transaction_response_is_unexpected() {
    let source = MockDataSource::new();
    source.respond_on(0, Ok(json!({"resourceType": "Bundle", "type": "batch-response", "entry": []})));
    let uploader = bundle_uploader(source, 1);

    let events: Vec<UploadEvent> = uploader.upload(vec![insert("a", 1)]).collect().await;

    let UploadEvent::Failure(failure) = &events[1] else {
        panic!("expected failure, got {:?}", events[1]);
    };
    assert!(matches!(failure.error, UploadError::UnexpectedResponse { .. }));
}

#[tokio::test]
async fn test_url_response_of_other_type_is_unexpected() {
    let source = MockDataSource::new();
    source.respond_on(0, Ok(json!({"resourceType": "Observation", "id": "a"})));
    source.respond_on(1, Ok(Value::Null));
    let uploader = url_uploader(source);

    let events: Vec<UploadEvent> = uploader
        .upload(vec![insert("a", 1), insert("b", 2)])
        .collect()
        .await;

    assert_eq!(kinds(&events), vec!["started", "failure", "failure"]);
    let UploadEvent::Failure(first) = &events[1] else {
        unreachable!()
    };
    assert_eq!(
        first.error,
        UploadError::unexpected_response("expected a Patient resource, got Observation")
    );
    let UploadEvent::Failure(second) = &events[2] else {
        unreachable!()
    };
    assert_eq!(second.error, UploadError::unexpected_response("empty response body"));
}

#[tokio::test]
async fn test_url_success_is_one_to_one() {
    let source = MockDataSource::new();
    let uploader = url_uploader(source.clone());

    let events: Vec<UploadEvent> = uploader
        .upload(vec![insert("a", 1), insert("b", 2)])
        .collect()
        .await;

    assert_eq!(
        kinds(&events),
        vec!["started", "success", "progress", "success", "progress"]
    );
    let UploadEvent::Success(success) = &events[3] else {
        unreachable!()
    };
    assert_eq!(success.kind, RequestKind::Url(HttpVerb::Put));
    assert_eq!(success.tokens(), vec![LocalChangeToken::single(2)]);
    assert!(success.mappings[0].response.is_none());
}
