//! Error types for the upload engine.
//!
//! - [`SyncError`] covers local failures: storage, configuration, invalid
//!   journal sequences and unsupported verbs. These fail fast, before any
//!   network call.
//! - [`DataSourceError`] is what a transport reports.
//! - [`UploadError`] is carried by `Failure` events and classifies why a
//!   request (or its consolidation) did not succeed.

use octofhir_sync_core::StorageError;

use crate::request::HttpVerb;

/// Local errors raised while preparing an upload.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The change log could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A request generator was configured with a verb it cannot use.
    #[error("{message}")]
    UnsupportedVerb {
        /// Human readable reason.
        message: String,
    },

    /// The journal for a resource cannot be folded into one change.
    #[error("Invalid change sequence for {resource_type}/{id}: {message}")]
    InvalidChangeSequence {
        /// The type of the resource.
        resource_type: String,
        /// The ID of the resource.
        id: String,
        /// Why the sequence was rejected.
        message: String,
    },

    /// A JSON patch could not be built or applied.
    #[error("Patch error: {message}")]
    Patch {
        /// Description of the patch failure.
        message: String,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

impl SyncError {
    /// Creates the error for an unsupported create verb.
    #[must_use]
    pub fn unsupported_create_verb(verb: HttpVerb) -> Self {
        Self::UnsupportedVerb {
            message: format!("Creation using {verb} is not supported."),
        }
    }

    /// Creates the error for an unsupported update verb.
    #[must_use]
    pub fn unsupported_update_verb(verb: HttpVerb) -> Self {
        Self::UnsupportedVerb {
            message: format!("Update using {verb} is not supported."),
        }
    }

    /// Creates a new `InvalidChangeSequence` error.
    #[must_use]
    pub fn invalid_change_sequence(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidChangeSequence {
            resource_type: resource_type.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Patch` error.
    #[must_use]
    pub fn patch(message: impl Into<String>) -> Self {
        Self::Patch {
            message: message.into(),
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Errors reported by a [`DataSource`](crate::DataSource).
#[derive(Debug, Clone, thiserror::Error)]
pub enum DataSourceError {
    /// The server could not be reached.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The request did not complete in time.
    #[error("Request timed out: {message}")]
    Timeout {
        /// Description of the timeout.
        message: String,
    },

    /// The server answered with an error status and a non-FHIR body.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Failed to decode response: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
    },
}

/// Why an upload request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// The request never got a usable answer from the server.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The server answered with an OperationOutcome.
    #[error("Server rejected the request: {diagnostics}")]
    ServerRejection {
        /// Diagnostics propagated from the OperationOutcome.
        diagnostics: String,
    },

    /// A transaction response held a different number of entries than the request.
    #[error("Transaction response has {actual} entries, expected {expected}")]
    ResponseSizeMismatch {
        /// Number of operations in the request.
        expected: usize,
        /// Number of entries in the response.
        actual: usize,
    },

    /// The response had an unexpected shape.
    #[error("Unexpected response: {message}")]
    UnexpectedResponse {
        /// Description of what was wrong.
        message: String,
    },

    /// The server accepted the request but the result could not be stored locally.
    #[error("Consolidation failed: {message}")]
    Consolidation {
        /// Description of the consolidation failure.
        message: String,
    },

    /// Preparing the upload failed locally.
    #[error("Local error: {message}")]
    Local {
        /// Description of the local failure.
        message: String,
    },
}

impl UploadError {
    /// Creates a new `UnexpectedResponse` error.
    #[must_use]
    pub fn unexpected_response(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
        }
    }

    /// Creates a new `Consolidation` error.
    #[must_use]
    pub fn consolidation(message: impl Into<String>) -> Self {
        Self::Consolidation {
            message: message.into(),
        }
    }

    /// Returns `true` if re-running the upload may succeed without any change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Consolidation { .. })
    }
}

impl From<DataSourceError> for UploadError {
    fn from(err: DataSourceError) -> Self {
        match err {
            DataSourceError::Decode { .. } => Self::unexpected_response(err.to_string()),
            DataSourceError::Http { status, .. } if (400..500).contains(&status) => {
                Self::ServerRejection {
                    diagnostics: err.to_string(),
                }
            }
            _ => Self::Transport {
                message: err.to_string(),
            },
        }
    }
}

impl From<SyncError> for UploadError {
    fn from(err: SyncError) -> Self {
        Self::Local {
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        Self::Local {
            message: err.to_string(),
        }
    }
}

/// Type alias for an engine result.
pub type SyncResult<T> = Result<T, SyncError>;
