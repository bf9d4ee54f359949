use async_trait::async_trait;
use octofhir_sync_core::LocalChange;

use super::{PatchGenerator, PatchSet};
use crate::error::SyncResult;

/// Uploads every journal entry as its own change, in journal order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerChangePatchGenerator;

#[async_trait]
impl PatchGenerator for PerChangePatchGenerator {
    async fn generate(&self, mut changes: Vec<LocalChange>) -> SyncResult<PatchSet> {
        changes.sort_by_key(|c| c.token.ids().first().copied());
        Ok(PatchSet {
            changes,
            discarded: Vec::new(),
        })
    }
}
