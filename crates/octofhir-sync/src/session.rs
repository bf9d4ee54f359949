//! The upload session: fetch, fold, upload, consolidate until the journal is drained.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use octofhir_sync_core::{DynDatabase, LocalChange, LocalChangeToken};
use tokio::sync::watch;

use crate::config::UploadConfig;
use crate::consolidator::{ResourceConsolidator, resource_consolidator};
use crate::datasource::DataSource;
use crate::error::{SyncError, SyncResult, UploadError};
use crate::fetcher::{LocalChangeFetcher, Progress, local_change_fetcher};
use crate::paginator::paginator;
use crate::patch::{PatchGenerator, patch_generator};
use crate::request::request_generator;
use crate::uploader::{UploadEvent, Uploader};

/// Events reported by [`UploadSession::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUploadEvent {
    /// Emitted once, with the number of resources that have pending changes.
    Started { total: usize },
    Progress(Progress),
    /// The session stopped; the journal rows behind `tokens` are still pending.
    Failure {
        error: UploadError,
        tokens: Vec<LocalChangeToken>,
    },
    /// Every pending change was uploaded and consolidated.
    Completed,
}

/// One upload job over a database and a data source.
///
/// Strategies are picked once, from the configuration, when the session is built.
pub struct UploadSession {
    db: DynDatabase,
    fetcher: Arc<dyn LocalChangeFetcher>,
    patch_generator: Arc<dyn PatchGenerator>,
    uploader: Uploader,
    consolidator: Arc<dyn ResourceConsolidator>,
    progress: watch::Sender<Progress>,
}

impl UploadSession {
    /// Builds a session from configuration.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` or `SyncError::UnsupportedVerb` before
    /// anything is read or sent.
    pub fn new(
        config: &UploadConfig,
        db: DynDatabase,
        data_source: Arc<dyn DataSource>,
    ) -> SyncResult<Self> {
        config.validate().map_err(SyncError::config)?;
        let uploader = Uploader::new(
            data_source,
            Arc::from(paginator(&config.splitter)),
            Arc::from(request_generator(&config.request, config.use_etag_for_upload)?),
        );
        Ok(Self::from_parts(
            db.clone(),
            Arc::from(local_change_fetcher(config.fetch_mode, db.clone())),
            Arc::from(patch_generator(config.patch_mode, db.clone())),
            uploader,
            Arc::from(resource_consolidator(&config.request, db)),
        ))
    }

    /// Builds a session from explicit components.
    pub fn from_parts(
        db: DynDatabase,
        fetcher: Arc<dyn LocalChangeFetcher>,
        patch_generator: Arc<dyn PatchGenerator>,
        uploader: Uploader,
        consolidator: Arc<dyn ResourceConsolidator>,
    ) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            db,
            fetcher,
            patch_generator,
            uploader,
            consolidator,
            progress,
        }
    }

    /// Returns a receiver that observes progress while the session runs.
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Runs the session as a lazy, single-pass event stream.
    ///
    /// Nothing happens until the stream is polled. Dropping it stops the
    /// session between requests; results already consolidated are kept.
    pub fn run(self) -> BoxStream<'static, SyncUploadEvent> {
        stream::unfold((self, Phase::Start), |(session, phase)| async move {
            let (event, phase) = session.step(phase).await?;
            Some((event, (session, phase)))
        })
        .boxed()
    }

    async fn step(&self, mut phase: Phase) -> Option<(SyncUploadEvent, Phase)> {
        loop {
            phase = match phase {
                Phase::Done => return None,
                Phase::Start => {
                    return Some(match self.progress().await {
                        Ok(progress) => {
                            tracing::info!(
                                total = progress.total,
                                backend = self.db.backend_name(),
                                "Upload session started"
                            );
                            (
                                SyncUploadEvent::Started {
                                    total: progress.total,
                                },
                                Phase::Fetch,
                            )
                        }
                        Err(error) => failed(error, Vec::new()),
                    });
                }
                Phase::Fetch => match self.fetch_round().await {
                    Ok(Round::Upload(changes)) => Phase::Upload(self.uploader.upload(changes)),
                    Ok(Round::Cleared) => {
                        return Some(match self.progress().await {
                            Ok(progress) => (SyncUploadEvent::Progress(progress), Phase::Fetch),
                            Err(error) => failed(error, Vec::new()),
                        });
                    }
                    Ok(Round::Exhausted) => {
                        tracing::info!("Upload session completed");
                        return Some((SyncUploadEvent::Completed, Phase::Done));
                    }
                    Err(error) => return Some(failed(error, Vec::new())),
                },
                Phase::Upload(mut events) => match events.next().await {
                    None => Phase::Fetch,
                    Some(UploadEvent::Started { .. } | UploadEvent::Progress { .. }) => {
                        Phase::Upload(events)
                    }
                    Some(UploadEvent::Success(success)) => {
                        let outcome = match self.consolidator.consolidate(&success).await {
                            Ok(outcome) => outcome,
                            Err(failure) => {
                                let tokens = failure.tokens();
                                return Some(failed(failure.error, tokens));
                            }
                        };
                        let progress = match self.progress().await {
                            Ok(progress) => progress,
                            Err(error) => return Some(failed(error, Vec::new())),
                        };
                        // Pending requests still name the old ids; rebuild them.
                        let next = if outcome.renamed {
                            Phase::Fetch
                        } else {
                            Phase::Upload(events)
                        };
                        return Some((SyncUploadEvent::Progress(progress), next));
                    }
                    Some(UploadEvent::Failure(failure)) => {
                        let tokens = failure.tokens();
                        return Some(failed(failure.error, tokens));
                    }
                },
            };
        }
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_round(&self) -> Result<Round, UploadError> {
        if !self.fetcher.has_next().await? {
            return Ok(Round::Exhausted);
        }
        let entries = self.fetcher.next().await?;
        let set = self.patch_generator.generate(entries).await?;
        for token in &set.discarded {
            self.db.delete_changes(token).await?;
        }
        tracing::debug!(
            changes = set.changes.len(),
            discarded = set.discarded.len(),
            "Prepared upload round"
        );
        Ok(match (set.changes.is_empty(), set.discarded.is_empty()) {
            (false, _) => Round::Upload(set.changes),
            (true, false) => Round::Cleared,
            (true, true) => Round::Exhausted,
        })
    }

    async fn progress(&self) -> Result<Progress, UploadError> {
        let progress = self.fetcher.get_progress().await?;
        self.progress.send_replace(progress);
        Ok(progress)
    }
}

enum Phase {
    Start,
    Fetch,
    Upload(BoxStream<'static, UploadEvent>),
    Done,
}

enum Round {
    Upload(Vec<LocalChange>),
    Cleared,
    Exhausted,
}

fn failed(error: UploadError, tokens: Vec<LocalChangeToken>) -> (SyncUploadEvent, Phase) {
    tracing::warn!(error = %error, tokens = tokens.len(), "Upload session stopped");
    (SyncUploadEvent::Failure { error, tokens }, Phase::Done)
}
