use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use futures_util::{Stream, StreamExt};
use octofhir_sync::{SyncConfig, SyncUploadEvent, UploadSession};
use octofhir_sync_core::DynDatabase;
use octofhir_sync_http::{AuthHeader, HttpDataSource};
use octofhir_sync_memory::MemoryDatabase;

use crate::output::print_event;

fn resolve_server(server: &Option<String>) -> Result<String> {
    let Some(server) = server else {
        anyhow::bail!("No server URL configured. Use --server or set OCTOFHIR_URL env var");
    };
    let url = url::Url::parse(server).with_context(|| format!("Invalid server URL: {server}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("Server URL must use http or https: {server}");
    }
    Ok(server.clone())
}

pub async fn upload(
    db: Arc<MemoryDatabase>,
    config: &SyncConfig,
    server: &Option<String>,
    token: &Option<String>,
) -> Result<()> {
    let server = resolve_server(server)?;
    println!("{}: {}", "Server".cyan(), server);

    tracing::debug!(server = %server, authenticated = token.is_some(), "starting upload session");
    let source = HttpDataSource::new(&server, token.clone().map(AuthHeader::bearer));
    let dyn_db: DynDatabase = db.clone();
    let session = UploadSession::new(&config.upload, dyn_db, Arc::new(source))?;

    let failed = follow_events(&db, session.run()).await?;
    db.save().await.context("Failed to save the local store")?;
    if failed {
        anyhow::bail!("Upload stopped; remaining changes stay pending");
    }
    Ok(())
}

/// Prints session events and saves the store after every consolidated round,
/// so an interrupted run does not upload those changes again.
async fn follow_events(
    db: &MemoryDatabase,
    mut events: impl Stream<Item = SyncUploadEvent> + Unpin,
) -> Result<bool> {
    let mut failed = false;
    while let Some(event) = events.next().await {
        failed |= matches!(event, SyncUploadEvent::Failure { .. });
        print_event(&event);
        if matches!(event, SyncUploadEvent::Progress(_)) {
            db.save().await.context("Failed to save the local store")?;
        }
    }
    Ok(failed)
}
