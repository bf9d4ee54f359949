//! The transport capability consumed by the uploader.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DataSourceError;
use crate::request::{BundleUploadRequest, UrlUploadRequest};

/// Sends upload requests to the remote server.
///
/// Implementations return the parsed response body. An `OperationOutcome`
/// body must be returned as `Ok` so the uploader can classify it; a
/// successful DELETE or an empty body is `Value::Null`.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Posts a transaction bundle and returns the transaction-response.
    async fn post_bundle(&self, request: &BundleUploadRequest) -> Result<Value, DataSourceError>;

    /// Executes a single resource request.
    async fn execute_url_request(&self, request: &UrlUploadRequest)
    -> Result<Value, DataSourceError>;
}
