//! Splitting a batch of local changes into upload-sized groups.

use octofhir_sync_core::LocalChange;

use crate::config::SplitterConfig;

/// Partitions local changes into ordered chunks.
///
/// Every input change lands in exactly one chunk. Empty input yields no chunks.
pub trait Paginator: Send + Sync {
    fn page(&self, changes: Vec<LocalChange>) -> Vec<Vec<LocalChange>>;
}

/// Fixed-size chunks in arrival order.
#[derive(Debug, Clone)]
pub struct SizePaginator {
    page_size: usize,
}

impl SizePaginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }
}

impl Paginator for SizePaginator {
    fn page(&self, changes: Vec<LocalChange>) -> Vec<Vec<LocalChange>> {
        chunk(changes, self.page_size)
    }
}

/// Chunks grouped by resource type.
///
/// Types listed in `priority` come first, in that order; unlisted types
/// follow in the order they were first encountered. Each type group is
/// chunked separately, so a chunk never mixes types.
#[derive(Debug, Clone)]
pub struct SizeAndTypePaginator {
    page_size: usize,
    priority: Vec<String>,
}

impl SizeAndTypePaginator {
    pub fn new(page_size: usize, priority: Vec<String>) -> Self {
        Self {
            page_size: page_size.max(1),
            priority,
        }
    }
}

impl Paginator for SizeAndTypePaginator {
    fn page(&self, changes: Vec<LocalChange>) -> Vec<Vec<LocalChange>> {
        let mut groups: Vec<(String, Vec<LocalChange>)> = Vec::new();
        for change in changes {
            match groups.iter_mut().find(|(t, _)| *t == change.resource_type) {
                Some((_, group)) => group.push(change),
                None => groups.push((change.resource_type.clone(), vec![change])),
            }
        }

        // Stable: unlisted types keep their encounter order at the end.
        groups.sort_by_key(|(resource_type, _)| {
            self.priority
                .iter()
                .position(|p| p == resource_type)
                .unwrap_or(usize::MAX)
        });

        groups
            .into_iter()
            .flat_map(|(_, group)| chunk(group, self.page_size))
            .collect()
    }
}

fn chunk(changes: Vec<LocalChange>, size: usize) -> Vec<Vec<LocalChange>> {
    let mut pages = Vec::with_capacity(changes.len().div_ceil(size));
    let mut iter = changes.into_iter().peekable();
    while iter.peek().is_some() {
        pages.push(iter.by_ref().take(size).collect());
    }
    pages
}

/// Builds the paginator selected by the configuration.
pub fn paginator(config: &SplitterConfig) -> Box<dyn Paginator> {
    match config {
        SplitterConfig::Size { page_size } => Box::new(SizePaginator::new(*page_size)),
        SplitterConfig::SizeAndType {
            page_size,
            priority,
        } => Box::new(SizeAndTypePaginator::new(*page_size, priority.clone())),
    }
}
