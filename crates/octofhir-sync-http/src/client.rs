use async_trait::async_trait;
use octofhir_sync::{BundleUploadRequest, DataSource, DataSourceError, HttpVerb, UrlUploadRequest};
use reqwest::Method;
use serde_json::Value;

use crate::auth::AuthHeader;

const FHIR_JSON: &str = "application/fhir+json";

/// A [`DataSource`] talking to a FHIR REST endpoint.
///
/// `base_url` is the FHIR base (e.g. `http://localhost:8888/fhir`); bundles
/// are posted to it and URL requests are resolved against it.
pub struct HttpDataSource {
    http: reqwest::Client,
    base_url: String,
    auth: Option<AuthHeader>,
}

impl HttpDataSource {
    pub fn new(base_url: &str, auth: Option<AuthHeader>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, auth)
    }

    /// Uses a preconfigured client, e.g. one with a request timeout.
    pub fn with_client(http: reqwest::Client, base_url: &str, auth: Option<AuthHeader>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resource_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, url);
        if let Some(auth) = &self.auth {
            req = auth.apply(req);
        }
        req.header("Accept", FHIR_JSON)
            .header("Prefer", "return=representation")
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn post_bundle(&self, request: &BundleUploadRequest) -> Result<Value, DataSourceError> {
        tracing::debug!(
            url = %self.base_url,
            entries = request.local_changes.len(),
            "Posting transaction bundle"
        );
        let body = serde_json::to_vec(&request.bundle).map_err(|e| DataSourceError::Decode {
            message: e.to_string(),
        })?;
        let resp = self
            .request(Method::POST, &self.base_url)
            .header("Content-Type", FHIR_JSON)
            .body(body)
            .send()
            .await
            .map_err(send_error)?;
        handle_response(resp, false).await
    }

    async fn execute_url_request(
        &self,
        request: &UrlUploadRequest,
    ) -> Result<Value, DataSourceError> {
        let url = self.resource_url(&request.url);
        tracing::debug!(method = %request.method, url = %url, "Sending resource request");

        let mut req = self.request(method(request.method), &url);
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(|e| DataSourceError::Decode {
                message: e.to_string(),
            })?;
            if !request.headers.contains_key("Content-Type") {
                req = req.header("Content-Type", FHIR_JSON);
            }
            req = req.body(bytes);
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.send().await.map_err(send_error)?;
        handle_response(resp, request.method == HttpVerb::Delete).await
    }
}

fn method(verb: HttpVerb) -> Method {
    match verb {
        HttpVerb::Get => Method::GET,
        HttpVerb::Post => Method::POST,
        HttpVerb::Put => Method::PUT,
        HttpVerb::Patch => Method::PATCH,
        HttpVerb::Delete => Method::DELETE,
    }
}

fn send_error(err: reqwest::Error) -> DataSourceError {
    if err.is_timeout() {
        DataSourceError::Timeout {
            message: err.to_string(),
        }
    } else {
        DataSourceError::Connection {
            message: err.to_string(),
        }
    }
}

/// OperationOutcome bodies are returned as `Ok`, whatever the status.
async fn handle_response(
    resp: reqwest::Response,
    is_delete: bool,
) -> Result<Value, DataSourceError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| {
        if e.is_timeout() {
            DataSourceError::Timeout {
                message: e.to_string(),
            }
        } else {
            DataSourceError::Decode {
                message: e.to_string(),
            }
        }
    })?;

    if !status.is_success() {
        if let Ok(json) = serde_json::from_str::<Value>(&body)
            && json.get("resourceType").and_then(|v| v.as_str()) == Some("OperationOutcome")
        {
            tracing::debug!(status = status.as_u16(), "Server answered with an OperationOutcome");
            return Ok(json);
        }
        tracing::warn!(status = status.as_u16(), "Request failed");
        return Err(DataSourceError::Http {
            status: status.as_u16(),
            body,
        });
    }

    if is_delete || body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&body).map_err(|e| DataSourceError::Decode {
        message: format!("Failed to parse response JSON: {e}"),
    })
}
