//! Selecting which pending changes each upload round processes.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use octofhir_sync_core::{DynDatabase, LocalChange};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::config::FetchMode;
use crate::error::SyncResult;

/// Upload progress over distinct resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn new(completed: usize, total: usize) -> Self {
        Self { completed, total }
    }

    /// Returns true once every counted resource has been uploaded.
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

#[async_trait]
pub trait LocalChangeFetcher: Send + Sync {
    /// Returns true while the journal still holds pending entries.
    async fn has_next(&self) -> SyncResult<bool>;

    /// Returns the next batch of single-entry local changes.
    async fn next(&self) -> SyncResult<Vec<LocalChange>>;

    /// Returns progress against the total fixed when the fetcher was first used.
    async fn get_progress(&self) -> SyncResult<Progress>;
}

/// Hands out the whole pending journal at once.
pub struct AllChangesLocalChangeFetcher {
    db: DynDatabase,
    total: OnceCell<usize>,
    completed: AtomicUsize,
}

impl AllChangesLocalChangeFetcher {
    pub fn new(db: DynDatabase) -> Self {
        Self {
            db,
            total: OnceCell::new(),
            completed: AtomicUsize::new(0),
        }
    }

    async fn total(&self) -> SyncResult<usize> {
        let total = self
            .total
            .get_or_try_init(|| async { self.db.pending_resource_count().await })
            .await?;
        Ok(*total)
    }
}

#[async_trait]
impl LocalChangeFetcher for AllChangesLocalChangeFetcher {
    async fn has_next(&self) -> SyncResult<bool> {
        self.total().await?;
        Ok(self.db.local_changes_count().await? > 0)
    }

    async fn next(&self) -> SyncResult<Vec<LocalChange>> {
        self.total().await?;
        Ok(self.db.get_all_local_changes().await?)
    }

    async fn get_progress(&self) -> SyncResult<Progress> {
        let total = self.total().await?;
        let remaining = self.db.pending_resource_count().await?;
        let observed = total.saturating_sub(remaining);
        // New local edits can raise `remaining`; never report going backwards.
        let previous = self.completed.fetch_max(observed, Ordering::SeqCst);
        Ok(Progress::new(previous.max(observed).min(total), total))
    }
}

/// Builds the fetcher selected by the configuration.
pub fn local_change_fetcher(mode: FetchMode, db: DynDatabase) -> Box<dyn LocalChangeFetcher> {
    match mode {
        FetchMode::AllChanges => Box::new(AllChangesLocalChangeFetcher::new(db)),
    }
}
