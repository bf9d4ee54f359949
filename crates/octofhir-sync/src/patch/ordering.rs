use std::collections::HashMap;

use octofhir_sync_core::reference::collect_references;
use octofhir_sync_core::{ChangeType, LocalChange};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Reorders changes so that every INSERT precedes the changes referencing it.
///
/// Depth-first topological order over references to resources inserted in the
/// same batch. Changes without such dependencies keep their arrival order;
/// reference cycles are broken at the point they are detected.
pub fn order_by_references(changes: Vec<LocalChange>) -> Vec<LocalChange> {
    let inserts: HashMap<String, usize> = changes
        .iter()
        .enumerate()
        .filter(|(_, c)| c.change_type == ChangeType::Insert)
        .map(|(i, c)| (c.reference(), i))
        .collect();
    if inserts.is_empty() {
        return changes;
    }

    let deps: Vec<Vec<usize>> = changes
        .iter()
        .enumerate()
        .map(|(i, change)| {
            collect_references(&change.payload)
                .iter()
                .filter_map(|r| inserts.get(&r.to_relative()).copied())
                .filter(|&dep| dep != i)
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; changes.len()];
    let mut order = Vec::with_capacity(changes.len());
    for i in 0..changes.len() {
        visit(i, &deps, &mut marks, &mut order);
    }

    let mut slots: Vec<Option<LocalChange>> = changes.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

fn visit(i: usize, deps: &[Vec<usize>], marks: &mut [Mark], order: &mut Vec<usize>) {
    if marks[i] != Mark::Unvisited {
        return;
    }
    marks[i] = Mark::Visiting;
    for &dep in &deps[i] {
        visit(dep, deps, marks, order);
    }
    marks[i] = Mark::Done;
    order.push(i);
}
