use std::collections::BTreeMap;
use std::time::Duration;

use octofhir_sync::{
    BundleUploadRequest, DataSource, DataSourceError, HttpVerb, UrlUploadRequest,
};
use octofhir_sync_core::{ChangeType, LocalChange, LocalChangeToken};
use octofhir_sync_http::{AuthHeader, HttpDataSource};
use serde_json::{Value, json};
use time::OffsetDateTime;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn change(change_type: ChangeType) -> LocalChange {
    LocalChange {
        resource_type: "Patient".into(),
        resource_id: "p1".into(),
        change_type,
        payload: json!({"resourceType": "Patient", "id": "p1"}),
        version_id: Some("3".into()),
        timestamp: OffsetDateTime::now_utc(),
        token: LocalChangeToken::single(1),
    }
}

fn url_request(
    verb: HttpVerb,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> UrlUploadRequest {
    let change_type = match verb {
        HttpVerb::Delete => ChangeType::Delete,
        HttpVerb::Patch => ChangeType::Update,
        _ => ChangeType::Insert,
    };
    UrlUploadRequest {
        method: verb,
        url: "Patient/p1".into(),
        body,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        local_change: change(change_type),
    }
}

#[tokio::test]
async fn test_post_bundle_to_base_url() {
    let server = MockServer::start().await;
    let bundle = json!({"resourceType": "Bundle", "type": "transaction", "entry": []});
    let response = json!({"resourceType": "Bundle", "type": "transaction-response", "entry": []});
    Mock::given(method("POST"))
        .and(path("/fhir"))
        .and(header("Authorization", "Bearer t0k"))
        .and(header("Content-Type", "application/fhir+json"))
        .and(header("Accept", "application/fhir+json"))
        .and(body_json(&bundle))
        .respond_with(ResponseTemplate::new(200).set_body_json(&response))
        .expect(1)
        .mount(&server)
        .await;

    let source = HttpDataSource::new(
        &format!("{}/fhir/", server.uri()),
        Some(AuthHeader::bearer("t0k")),
    );
    let result = source
        .post_bundle(&BundleUploadRequest {
            bundle,
            local_changes: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(result, response);
}

#[tokio::test]
async fn test_patch_request_sends_its_headers() {
    let server = MockServer::start().await;
    let patch = json!([{"op": "replace", "path": "/active", "value": false}]);
    let patient = json!({"resourceType": "Patient", "id": "p1", "active": false});
    Mock::given(method("PATCH"))
        .and(path("/fhir/Patient/p1"))
        .and(header("Content-Type", "application/json-patch+json"))
        .and(header("If-Match", "W/\"3\""))
        .and(body_json(&patch))
        .respond_with(ResponseTemplate::new(200).set_body_json(&patient))
        .expect(1)
        .mount(&server)
        .await;

    let source = HttpDataSource::new(&format!("{}/fhir", server.uri()), None);
    let request = url_request(
        HttpVerb::Patch,
        Some(patch),
        &[
            ("Content-Type", "application/json-patch+json"),
            ("If-Match", "W/\"3\""),
        ],
    );
    assert_eq!(source.execute_url_request(&request).await.unwrap(), patient);
}

#[tokio::test]
async fn test_operation_outcome_is_returned_for_classification() {
    let server = MockServer::start().await;
    let outcome = json!({
        "resourceType": "OperationOutcome",
        "issue": [{"severity": "error", "code": "conflict", "diagnostics": "Version mismatch"}]
    });
    Mock::given(method("PUT"))
        .and(path("/fhir/Patient/p1"))
        .respond_with(ResponseTemplate::new(412).set_body_json(&outcome))
        .mount(&server)
        .await;

    let source = HttpDataSource::new(&format!("{}/fhir", server.uri()), None);
    let request = url_request(HttpVerb::Put, Some(json!({"resourceType": "Patient", "id": "p1"})), &[]);
    assert_eq!(source.execute_url_request(&request).await.unwrap(), outcome);
}

#[tokio::test]
async fn test_non_fhir_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let source = HttpDataSource::new(&format!("{}/fhir", server.uri()), None);
    let request = url_request(HttpVerb::Put, Some(json!({"resourceType": "Patient"})), &[]);
    let err = source.execute_url_request(&request).await.unwrap_err();
    assert!(matches!(
        err,
        DataSourceError::Http { status: 502, ref body } if body == "bad gateway"
    ));
}

#[tokio::test]
async fn test_delete_yields_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/fhir/Patient/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "information", "code": "informational"}]
        })))
        .mount(&server)
        .await;

    let source = HttpDataSource::new(&format!("{}/fhir", server.uri()), None);
    let result = source
        .execute_url_request(&url_request(HttpVerb::Delete, None, &[]))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
}

#[tokio::test]
async fn test_empty_success_body_yields_null() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let source = HttpDataSource::new(&format!("{}/fhir", server.uri()), Some(AuthHeader::basic("u", "p")));
    let request = url_request(HttpVerb::Put, Some(json!({"resourceType": "Patient"})), &[]);
    assert_eq!(source.execute_url_request(&request).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let source = HttpDataSource::with_client(client, &server.uri(), None);
    let err = source
        .post_bundle(&BundleUploadRequest {
            bundle: json!({"resourceType": "Bundle", "type": "transaction"}),
            local_changes: Vec::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DataSourceError::Timeout { .. }));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let source = HttpDataSource::new(&format!("http://127.0.0.1:{port}/fhir"), None);
    let err = source
        .execute_url_request(&url_request(HttpVerb::Delete, None, &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, DataSourceError::Connection { .. }));
}
