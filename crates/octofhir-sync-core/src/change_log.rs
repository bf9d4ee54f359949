//! Journal append rules and JSON patch helpers.
//!
//! Writers call [`validate_append`] before adding an entry so the journal for
//! a resource always replays to a valid state, and use [`diff_resources`] to
//! turn a full resource update into the RFC 6902 payload of an UPDATE entry.

use json_patch::{Patch, patch};
use serde_json::Value;

use crate::error::StorageError;
use crate::types::ChangeType;

/// Checks that `next` may be appended after the last pending entry `last`.
///
/// INSERT is only valid when nothing is pending for the resource. UPDATE and
/// DELETE are never valid after a pending DELETE.
pub fn validate_append(
    resource_type: &str,
    id: &str,
    last: Option<ChangeType>,
    next: ChangeType,
) -> Result<(), StorageError> {
    match (last, next) {
        (Some(pending), ChangeType::Insert) => Err(StorageError::invalid_change(
            resource_type,
            id,
            format!("cannot INSERT on top of a pending {pending}"),
        )),
        (Some(ChangeType::Delete), ChangeType::Update | ChangeType::Delete) => {
            Err(StorageError::invalid_change(
                resource_type,
                id,
                format!("cannot {next} a resource with a pending DELETE"),
            ))
        }
        _ => Ok(()),
    }
}

/// Computes the RFC 6902 patch turning `old` into `new`, as a JSON array.
pub fn diff_resources(old: &Value, new: &Value) -> Result<Value, StorageError> {
    let patch = json_patch::diff(old, new);
    Ok(serde_json::to_value(patch)?)
}

/// Returns true if `patch` is a JSON patch array with no operations.
pub fn is_empty_patch(patch: &Value) -> bool {
    patch.as_array().is_some_and(Vec::is_empty)
}

/// Applies an RFC 6902 patch held as a JSON value to `doc` in place.
pub fn apply_patch(doc: &mut Value, patch_value: &Value) -> Result<(), StorageError> {
    let operations: Patch = serde_json::from_value(patch_value.clone())
        .map_err(|e| StorageError::invalid_resource(format!("Invalid JSON Patch document: {e}")))?;
    patch(doc, &operations)
        .map_err(|e| StorageError::invalid_resource(format!("Patch operation failed: {e}")))
}

/// Returns the `(resourceType, id)` pair of a resource body.
pub fn resource_identity(resource: &Value) -> Result<(String, String), StorageError> {
    let resource_type = resource
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError::invalid_resource("Missing resourceType"))?;
    let id = resource
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StorageError::invalid_resource("Missing id"))?;
    Ok((resource_type.to_string(), id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_append_rules() {
        assert!(validate_append("Patient", "p1", None, ChangeType::Insert).is_ok());
        assert!(validate_append("Patient", "p1", None, ChangeType::Update).is_ok());
        assert!(validate_append("Patient", "p1", Some(ChangeType::Insert), ChangeType::Update).is_ok());
        assert!(validate_append("Patient", "p1", Some(ChangeType::Delete), ChangeType::Insert).is_err());

        let err = validate_append("Patient", "p1", Some(ChangeType::Update), ChangeType::Insert)
            .unwrap_err();
        assert!(err.is_invalid_change());

        let err = validate_append("Patient", "p1", Some(ChangeType::Delete), ChangeType::Update)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid local change for Patient/p1: cannot UPDATE a resource with a pending DELETE"
        );
    }

    #[test]
    fn test_diff_and_apply() {
        let old = json!({"resourceType": "Patient", "id": "p1", "active": true});
        let new = json!({"resourceType": "Patient", "id": "p1", "active": false, "gender": "female"});

        let diff = diff_resources(&old, &new).unwrap();
        assert!(!is_empty_patch(&diff));

        let mut doc = old.clone();
        apply_patch(&mut doc, &diff).unwrap();
        assert_eq!(doc, new);
    }

    #[test]
    fn test_diff_of_identical_resources_is_empty() {
        let r = json!({"resourceType": "Patient", "id": "p1"});
        assert!(is_empty_patch(&diff_resources(&r, &r).unwrap()));
    }

    #[test]
    fn test_apply_invalid_patch() {
        let mut doc = json!({"a": 1});
        let err = apply_patch(&mut doc, &json!([{"op": "remove", "path": "/missing"}]))
            .unwrap_err();
        assert!(err.to_string().contains("Patch operation failed"));
    }

    #[test]
    fn test_resource_identity() {
        let (t, id) = resource_identity(&json!({"resourceType": "Encounter", "id": "e1"})).unwrap();
        assert_eq!((t.as_str(), id.as_str()), ("Encounter", "e1"));
        assert!(resource_identity(&json!({"resourceType": "Encounter"})).is_err());
    }
}
