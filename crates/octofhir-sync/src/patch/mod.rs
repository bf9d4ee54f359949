//! Patch generation: folding journal entries into upload-ready local changes.
//!
//! Two strategies are available, selected once per session from
//! [`PatchMode`]:
//!
//! - [`PerChangePatchGenerator`] uploads every journal entry on its own.
//! - [`PerResourcePatchGenerator`] squashes all entries of a resource into a
//!   single change against the last server-confirmed state, then orders the
//!   result so creations precede the changes that reference them.

mod ordering;
mod per_change;
mod per_resource;

use async_trait::async_trait;
use octofhir_sync_core::{DynDatabase, LocalChange, LocalChangeToken};

use crate::config::PatchMode;
use crate::error::SyncResult;

pub use ordering::order_by_references;
pub use per_change::PerChangePatchGenerator;
pub use per_resource::PerResourcePatchGenerator;

/// The output of a patch generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchSet {
    /// Changes to upload, in upload order.
    pub changes: Vec<LocalChange>,
    /// Tokens whose entries cancel out (e.g. INSERT then DELETE) and only need clearing.
    pub discarded: Vec<LocalChangeToken>,
}

impl PatchSet {
    /// Returns true if there is nothing to upload and nothing to clear.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.discarded.is_empty()
    }
}

/// Turns single-entry local changes (as read from the journal) into upload units.
#[async_trait]
pub trait PatchGenerator: Send + Sync {
    async fn generate(&self, changes: Vec<LocalChange>) -> SyncResult<PatchSet>;
}

/// Builds the generator selected by the configuration.
pub fn patch_generator(mode: PatchMode, db: DynDatabase) -> Box<dyn PatchGenerator> {
    match mode {
        PatchMode::PerChange => Box::new(PerChangePatchGenerator),
        PatchMode::PerResource => Box::new(PerResourcePatchGenerator::new(db)),
    }
}
