use async_trait::async_trait;
use octofhir_sync_core::change_log::{apply_patch, diff_resources, is_empty_patch};
use octofhir_sync_core::{ChangeType, DynDatabase, LocalChange, LocalChangeToken};
use serde_json::Value;

use super::{PatchGenerator, PatchSet, order_by_references};
use crate::error::{SyncError, SyncResult};

/// Squashes all pending entries of a resource into one local change.
///
/// | entries                    | result                                      |
/// |----------------------------|---------------------------------------------|
/// | INSERT ... DELETE          | nothing; token lands in `discarded`         |
/// | INSERT, UPDATE*            | INSERT with every diff applied              |
/// | UPDATE* ... DELETE         | DELETE                                      |
/// | UPDATE+                    | one UPDATE diffed from the synced snapshot  |
///
/// The first surviving entry decides between the INSERT and UPDATE rows; the
/// base version is taken from it too.
pub struct PerResourcePatchGenerator {
    db: DynDatabase,
}

impl PerResourcePatchGenerator {
    pub fn new(db: DynDatabase) -> Self {
        Self { db }
    }

    async fn squash(&self, mut group: Vec<LocalChange>) -> SyncResult<Squashed> {
        group.sort_by_key(|c| c.token.ids().first().copied());
        validate_sequence(&group)?;

        let token = group
            .iter()
            .fold(LocalChangeToken::default(), |acc, c| acc.union(&c.token));
        if group.len() == 1 {
            return Ok(Squashed::Change(group.remove(0)));
        }

        let first = &group[0];
        let last = &group[group.len() - 1];
        let mut result = LocalChange {
            resource_type: first.resource_type.clone(),
            resource_id: first.resource_id.clone(),
            change_type: first.change_type,
            payload: Value::Null,
            version_id: first.version_id.clone(),
            timestamp: last.timestamp,
            token,
        };

        match (first.change_type, last.change_type) {
            (ChangeType::Insert, ChangeType::Delete) => {
                tracing::debug!(
                    resource_type = %result.resource_type,
                    id = %result.resource_id,
                    "Created and deleted locally; nothing to upload"
                );
                return Ok(Squashed::Discarded(result.token));
            }
            (_, ChangeType::Delete) => {
                result.change_type = ChangeType::Delete;
                result.payload = last.payload.clone();
            }
            (ChangeType::Insert, _) => {
                let mut resource = first.payload.clone();
                for update in &group[1..] {
                    apply_patch(&mut resource, &update.payload)
                        .map_err(|e| SyncError::patch(e.to_string()))?;
                }
                result.payload = resource;
            }
            _ => {
                let patches: Vec<&Value> = group.iter().map(|c| &c.payload).collect();
                let base = self
                    .db
                    .synced_snapshot(&result.resource_type, &result.resource_id)
                    .await?;
                let payload = match base {
                    Some(base) => squash_against(&base, &patches)
                        .unwrap_or_else(|| merge_patches(&patches)),
                    None => merge_patches(&patches),
                };
                if is_empty_patch(&payload) {
                    tracing::debug!(
                        resource_type = %result.resource_type,
                        id = %result.resource_id,
                        "Updates cancel out; nothing to upload"
                    );
                    return Ok(Squashed::Discarded(result.token));
                }
                result.payload = payload;
            }
        }
        Ok(Squashed::Change(result))
    }
}

enum Squashed {
    Change(LocalChange),
    Discarded(LocalChangeToken),
}

fn validate_sequence(group: &[LocalChange]) -> SyncResult<()> {
    for (i, change) in group.iter().enumerate() {
        if i > 0 && group[i - 1].change_type == ChangeType::Delete {
            return Err(SyncError::invalid_change_sequence(
                &change.resource_type,
                &change.resource_id,
                "Changes after deletion of resource are not permitted",
            ));
        }
        if i > 0 && change.change_type == ChangeType::Insert {
            return Err(SyncError::invalid_change_sequence(
                &change.resource_type,
                &change.resource_id,
                "Changes before creation of resource are not permitted",
            ));
        }
    }
    Ok(())
}

/// Diffs the base against the base with every patch applied.
fn squash_against(base: &Value, patches: &[&Value]) -> Option<Value> {
    let mut current = base.clone();
    for patch in patches {
        if let Err(e) = apply_patch(&mut current, patch) {
            tracing::warn!(error = %e, "Pending diffs do not apply to the synced snapshot");
            return None;
        }
    }
    diff_resources(base, &current).ok()
}

/// Concatenates patches, keeping only the last operation per object path.
///
/// An `add`, `replace` or `remove` on a path made of object keys supersedes
/// earlier operations on that path and on everything below it. Paths through
/// an array position never supersede anything, since indexes shift as
/// elements are inserted and removed. A `remove` keeps an earlier `add` of the
/// same path, because the member may not exist in the base.
fn merge_patches(patches: &[&Value]) -> Value {
    let mut merged: Vec<Value> = Vec::new();
    for op in patches.iter().filter_map(|p| p.as_array()).flatten() {
        let path = op_field(op, "path");
        let kind = op_field(op, "op");
        let keyed = matches!(kind, "add" | "replace" | "remove")
            && !path.split('/').skip(1).any(is_array_position)
            && merged.iter().all(|earlier| earlier.get("from").is_none());
        if !keyed {
            merged.push(op.clone());
            continue;
        }

        let prefix = format!("{path}/");
        let mut dropped_add = false;
        merged.retain(|earlier| {
            let p = op_field(earlier, "path");
            if p.starts_with(&prefix) {
                return false;
            }
            if p != path {
                return true;
            }
            let earlier_kind = op_field(earlier, "op");
            if kind == "remove" && earlier_kind == "add" {
                return true;
            }
            dropped_add |= earlier_kind == "add";
            false
        });

        let mut op = op.clone();
        if kind == "replace" && dropped_add {
            op["op"] = Value::from("add");
        }
        merged.push(op);
    }
    Value::Array(merged)
}

fn op_field<'a>(op: &'a Value, key: &str) -> &'a str {
    op.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn is_array_position(segment: &str) -> bool {
    segment == "-" || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

#[async_trait]
impl PatchGenerator for PerResourcePatchGenerator {
    async fn generate(&self, changes: Vec<LocalChange>) -> SyncResult<PatchSet> {
        let mut groups: Vec<Vec<LocalChange>> = Vec::new();
        for change in changes {
            let existing = groups.iter_mut().find(|g| {
                g[0].resource_type == change.resource_type && g[0].resource_id == change.resource_id
            });
            match existing {
                Some(group) => group.push(change),
                None => groups.push(vec![change]),
            }
        }

        let mut set = PatchSet::default();
        for group in groups {
            match self.squash(group).await? {
                Squashed::Change(change) => set.changes.push(change),
                Squashed::Discarded(token) => set.discarded.push(token),
            }
        }
        set.changes = order_by_references(set.changes);
        Ok(set)
    }
}
