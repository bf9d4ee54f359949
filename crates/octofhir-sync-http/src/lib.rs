//! `reqwest`-based [`DataSource`](octofhir_sync::DataSource) for uploading
//! local changes to a FHIR REST server.

mod auth;
mod client;

pub use auth::AuthHeader;
pub use client::HttpDataSource;
