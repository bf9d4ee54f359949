//! Upload engine for locally journaled FHIR changes.
//!
//! The pipeline, leaf first:
//!
//! - [`LocalChangeFetcher`] - selects pending journal entries and tracks progress
//! - [`PatchGenerator`] - folds entries into upload-ready [`LocalChange`]s
//! - [`Paginator`] - splits changes into upload-sized chunks
//! - [`UploadRequestGenerator`] - turns chunks into bundle or per-resource requests
//! - [`Uploader`] - sends requests through a [`DataSource`] and classifies responses
//! - [`ResourceConsolidator`] - writes server results back and clears the journal
//! - [`UploadSession`] - drives all of the above as one lazy event stream
//!
//! Every strategy is chosen from [`SyncConfig`] when a session is built.
//!
//! [`LocalChange`]: octofhir_sync_core::LocalChange

pub mod config;
pub mod consolidator;
mod datasource;
mod error;
pub mod fetcher;
pub mod paginator;
pub mod patch;
pub mod request;
mod session;
pub mod uploader;

pub use config::{
    FetchMode, LoggingConfig, PatchMode, RequestConfig, SplitterConfig, SyncConfig, UploadConfig,
};
pub use consolidator::{
    ConsolidationOutcome, DefaultResourceConsolidator, PostPerResourceUrlConsolidator,
    ResourceConsolidator,
};
pub use datasource::DataSource;
pub use error::{DataSourceError, SyncError, SyncResult, UploadError};
pub use fetcher::{AllChangesLocalChangeFetcher, LocalChangeFetcher, Progress};
pub use paginator::{Paginator, SizeAndTypePaginator, SizePaginator};
pub use patch::{PatchGenerator, PatchSet, PerChangePatchGenerator, PerResourcePatchGenerator};
pub use request::{
    BundleRequestGenerator, BundleUploadRequest, HttpVerb, UploadRequest, UploadRequestGenerator,
    UrlRequestGenerator, UrlUploadRequest,
};
pub use session::{SyncUploadEvent, UploadSession};
pub use uploader::{
    EntryResponse, RequestKind, ResourceUploadResponseMapping, UploadEvent, UploadFailure,
    UploadSuccess, Uploader,
};
