//! FHIR reference parsing and rewriting.
//!
//! Local changes refer to each other through `"reference": "Type/id"` fields.
//! The upload engine needs to find those references (to order creations
//! before the resources pointing at them) and to rewrite them when the
//! server assigns a new id to a locally created resource.
//!
//! # Example
//!
//! ```
//! use octofhir_sync_core::reference::{parse_reference, rewrite_references};
//! use serde_json::json;
//!
//! let r = parse_reference("Patient/123/_history/2").unwrap();
//! assert_eq!(r.resource_type, "Patient");
//! assert_eq!(r.version, Some("2".to_string()));
//!
//! let mut obs = json!({"subject": {"reference": "Patient/local-1"}});
//! assert_eq!(rewrite_references(&mut obs, "Patient/local-1", "Patient/srv-9"), 1);
//! assert_eq!(obs["subject"]["reference"], "Patient/srv-9");
//! ```

use serde_json::Value;
use std::fmt;

/// A successfully parsed relative FHIR reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FhirReference {
    /// The resource type (e.g., "Patient", "Observation")
    pub resource_type: String,
    /// The resource ID
    pub id: String,
    /// Optional version ID from `_history` suffix
    pub version: Option<String>,
}

impl FhirReference {
    /// Creates a new FhirReference.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    /// Returns the reference as a relative string (Type/id).
    pub fn to_relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for FhirReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_relative())
    }
}

/// A reference that does not point at a resource in the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvableReference {
    /// A contained reference (starts with `#`)
    Contained(String),
    /// A URN reference (`urn:uuid:xxx` or `urn:oid:xxx`)
    Urn(String),
    /// An absolute URL
    External(String),
    /// A malformed or invalid reference
    Invalid(String),
}

impl fmt::Display for UnresolvableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contained(id) => write!(f, "contained reference: #{id}"),
            Self::Urn(urn) => write!(f, "URN reference: {urn}"),
            Self::External(url) => write!(f, "external reference: {url}"),
            Self::Invalid(reason) => write!(f, "invalid reference: {reason}"),
        }
    }
}

impl std::error::Error for UnresolvableReference {}

/// Parse a relative FHIR reference (`Type/id` or `Type/id/_history/v`).
///
/// Contained, URN and absolute references are reported as unresolvable since
/// they can never name a locally journaled resource.
pub fn parse_reference(reference: &str) -> Result<FhirReference, UnresolvableReference> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(UnresolvableReference::Invalid(
            "empty reference".to_string(),
        ));
    }

    if let Some(contained_id) = reference.strip_prefix('#') {
        return Err(UnresolvableReference::Contained(contained_id.to_string()));
    }

    if reference.starts_with("urn:") {
        return Err(UnresolvableReference::Urn(reference.to_string()));
    }

    if reference.contains("://") {
        return Err(UnresolvableReference::External(reference.to_string()));
    }

    let parts: Vec<&str> = reference.split('/').collect();
    if parts.len() < 2 {
        return Err(UnresolvableReference::Invalid(format!(
            "reference must contain at least Type/id: {reference}"
        )));
    }

    let resource_type = parts[0];
    let id = parts[1];

    if !resource_type
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
    {
        return Err(UnresolvableReference::Invalid(format!(
            "resource type must start with uppercase letter: {resource_type}"
        )));
    }

    if id.is_empty() {
        return Err(UnresolvableReference::Invalid(
            "resource id cannot be empty".to_string(),
        ));
    }

    let version = if parts.len() >= 4 && parts[2] == "_history" {
        Some(parts[3].to_string())
    } else {
        None
    };

    Ok(FhirReference {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        version,
    })
}

/// Collects every local reference found anywhere in `value`.
///
/// Both resource bodies (`{"reference": "Type/id"}`) and JSON patch
/// operations (`{"path": ".../reference", "value": "Type/id"}`) are searched.
/// Duplicates are removed; encounter order is preserved.
pub fn collect_references(value: &Value) -> Vec<FhirReference> {
    let mut found = Vec::new();
    visit_reference_strings(value, &mut |s| {
        if let Ok(r) = parse_reference(s) {
            let r = FhirReference::new(r.resource_type, r.id);
            if !found.contains(&r) {
                found.push(r);
            }
        }
    });
    found
}

/// Replaces references to `from` (`Type/id`) with `to` throughout `value`.
///
/// Versioned references keep their `_history` suffix. Returns the number of
/// references rewritten.
pub fn rewrite_references(value: &mut Value, from: &str, to: &str) -> usize {
    let mut count = 0;
    rewrite_in(value, from, to, &mut count);
    count
}

fn visit_reference_strings(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("reference") {
                f(s);
            }
            if is_reference_patch_op(map) {
                if let Some(Value::String(s)) = map.get("value") {
                    f(s);
                }
            }
            for v in map.values() {
                visit_reference_strings(v, f);
            }
        }
        Value::Array(items) => {
            for v in items {
                visit_reference_strings(v, f);
            }
        }
        _ => {}
    }
}

fn rewrite_in(value: &mut Value, from: &str, to: &str, count: &mut usize) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get_mut("reference") {
                rewrite_string(s, from, to, count);
            }
            if is_reference_patch_op(map) {
                if let Some(Value::String(s)) = map.get_mut("value") {
                    rewrite_string(s, from, to, count);
                }
            }
            for v in map.values_mut() {
                rewrite_in(v, from, to, count);
            }
        }
        Value::Array(items) => {
            for v in items {
                rewrite_in(v, from, to, count);
            }
        }
        _ => {}
    }
}

fn is_reference_patch_op(map: &serde_json::Map<String, Value>) -> bool {
    map.get("op").is_some()
        && map
            .get("path")
            .and_then(Value::as_str)
            .is_some_and(|p| p.ends_with("/reference"))
}

fn rewrite_string(s: &mut String, from: &str, to: &str, count: &mut usize) {
    if s == from {
        *s = to.to_string();
        *count += 1;
    } else if let Some(rest) = s.strip_prefix(from) {
        if rest.starts_with("/_history/") {
            *s = format!("{to}{rest}");
            *count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_relative_reference() {
        let r = parse_reference("Patient/123").unwrap();
        assert_eq!(r.resource_type, "Patient");
        assert_eq!(r.id, "123");
        assert_eq!(r.version, None);
    }

    #[test]
    fn test_versioned_reference() {
        let r = parse_reference("Patient/123/_history/2").unwrap();
        assert_eq!(r.id, "123");
        assert_eq!(r.version, Some("2".to_string()));
    }

    #[test]
    fn test_unresolvable_references() {
        assert!(matches!(
            parse_reference("#contained-id"),
            Err(UnresolvableReference::Contained(id)) if id == "contained-id"
        ));
        assert!(matches!(
            parse_reference("urn:uuid:550e8400-e29b-41d4-a716-446655440000"),
            Err(UnresolvableReference::Urn(_))
        ));
        assert!(matches!(
            parse_reference("http://other-server.com/fhir/Patient/123"),
            Err(UnresolvableReference::External(_))
        ));
        assert!(matches!(
            parse_reference("patient/123"),
            Err(UnresolvableReference::Invalid(_))
        ));
        assert!(matches!(
            parse_reference("Patient/"),
            Err(UnresolvableReference::Invalid(_))
        ));
        assert!(matches!(
            parse_reference("  "),
            Err(UnresolvableReference::Invalid(_))
        ));
    }

    #[test]
    fn test_collect_references_from_resource() {
        let obs = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/p1"},
            "performer": [
                {"reference": "Practitioner/dr"},
                {"reference": "Patient/p1"},
                {"reference": "#contained"}
            ]
        });
        let refs = collect_references(&obs);
        assert_eq!(
            refs,
            vec![
                FhirReference::new("Patient", "p1"),
                FhirReference::new("Practitioner", "dr")
            ]
        );
    }

    #[test]
    fn test_collect_references_from_patch() {
        let patch = json!([
            {"op": "replace", "path": "/subject/reference", "value": "Patient/p2"},
            {"op": "add", "path": "/performer/0", "value": {"reference": "Practitioner/dr"}}
        ]);
        let refs = collect_references(&patch);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], FhirReference::new("Patient", "p2"));
    }

    #[test]
    fn test_rewrite_references() {
        let mut value = json!({
            "subject": {"reference": "Patient/local"},
            "basedOn": [{"reference": "Patient/local/_history/3"}],
            "other": {"reference": "Patient/local-2"}
        });
        let n = rewrite_references(&mut value, "Patient/local", "Patient/srv");
        assert_eq!(n, 2);
        assert_eq!(value["subject"]["reference"], "Patient/srv");
        assert_eq!(value["basedOn"][0]["reference"], "Patient/srv/_history/3");
        assert_eq!(value["other"]["reference"], "Patient/local-2");
    }

    #[test]
    fn test_rewrite_references_in_patch() {
        let mut patch = json!([
            {"op": "replace", "path": "/subject/reference", "value": "Patient/local"}
        ]);
        assert_eq!(rewrite_references(&mut patch, "Patient/local", "Patient/srv"), 1);
        assert_eq!(patch[0]["value"], "Patient/srv");
    }
}
