use super::metrics::json_type_name;
use super::{Invocation, MetricsSchema};
use crate::error::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

static RE_SHA256_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{64}$").unwrap());

/// Validate a candidate payload and convert it into an [`Invocation`].
///
/// Checks run top-down and stop at the first violation, which is reported
/// with the dotted path of the offending field. `metrics` is checked
/// against `schema`.
pub fn validate_candidate(
    candidate: &Value,
    schema: MetricsSchema,
) -> Result<Invocation, ValidationError> {
    let root = as_object(candidate, "invocation")?;

    required_str(root, "", "osm_version", true)?;
    defaulted_str(root, "", "user_comment")?;

    let client = required_object(root, "", "client")?;
    match client.get("compute_context_id") {
        Some(Value::Number(n)) if n.as_u64().is_some_and(|v| v <= u64::from(u32::MAX)) => {}
        Some(other) => {
            return Err(ValidationError::new(
                "client.compute_context_id",
                format!("expected a non-negative integer, found {}", describe(other)),
            ))
        }
        None => return Err(missing("client.compute_context_id")),
    }
    if let Some(email) = optional_str(client, "client.", "email")? {
        if !RE_EMAIL.is_match(email) {
            return Err(ValidationError::new(
                "client.email",
                format!("'{email}' is not a valid email address"),
            ));
        }
    }

    let work = required_object(root, "", "work")?;
    required_str(work, "work.", "user_defined_id", true)?;
    for key in ["pmid", "doi", "openalex_id", "scopus_id"] {
        optional_str(work, "work.", key)?;
    }
    defaulted_str(work, "work.", "filename")?;
    let hash = required_str(work, "work.", "content_hash", true)?;
    if !RE_SHA256_HEX.is_match(hash) {
        return Err(ValidationError::new(
            "work.content_hash",
            "expected 64 lowercase hex characters",
        ));
    }

    let metrics = required_object(root, "", "metrics")?;
    schema.check(metrics)?;

    match root.get("components") {
        Some(Value::Array(items)) if items.is_empty() => {
            return Err(ValidationError::new("components", "must list at least one stage"))
        }
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let path = format!("components.{i}");
                let entry = as_object(item, &path)?;
                let prefix = format!("{path}.");
                required_str(entry, &prefix, "name", true)?;
                required_str(entry, &prefix, "version", true)?;
                optional_str(entry, &prefix, "docker_image")?;
                optional_str(entry, &prefix, "docker_image_id")?;
            }
        }
        Some(other) => {
            return Err(ValidationError::new(
                "components",
                format!("expected an array, found {}", describe(other)),
            ))
        }
        None => return Err(missing("components")),
    }

    for key in ["funder", "data_tags"] {
        match root.get(key) {
            None => {}
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
            Some(other) => {
                return Err(ValidationError::new(
                    key,
                    format!("expected a list of strings, found {}", describe(other)),
                ))
            }
        }
    }

    let created_at = required_str(root, "", "created_at", true)?;
    if chrono::DateTime::parse_from_rfc3339(created_at).is_err() {
        return Err(ValidationError::new(
            "created_at",
            format!("'{created_at}' is not an RFC 3339 timestamp"),
        ));
    }

    serde_json::from_value(candidate.clone())
        .map_err(|e| ValidationError::new("invocation", e.to_string()))
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(_) | Value::Bool(_) => format!("{} `{value}`", json_type_name(value)),
        _ => json_type_name(value).to_string(),
    }
}

fn missing(path: &str) -> ValidationError {
    ValidationError::new(path, "field required")
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, ValidationError> {
    value.as_object().ok_or_else(|| {
        ValidationError::new(path, format!("expected an object, found {}", describe(value)))
    })
}

fn required_object<'a>(
    parent: &'a Map<String, Value>,
    prefix: &str,
    key: &str,
) -> Result<&'a Map<String, Value>, ValidationError> {
    let path = format!("{prefix}{key}");
    match parent.get(key) {
        Some(value) => as_object(value, &path),
        None => Err(missing(&path)),
    }
}

fn required_str<'a>(
    parent: &'a Map<String, Value>,
    prefix: &str,
    key: &str,
    non_empty: bool,
) -> Result<&'a str, ValidationError> {
    let path = format!("{prefix}{key}");
    match parent.get(key) {
        Some(Value::String(s)) if non_empty && s.trim().is_empty() => {
            Err(ValidationError::new(path, "must not be empty"))
        }
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ValidationError::new(
            path,
            format!("expected a string, found {}", describe(other)),
        )),
        None => Err(missing(&path)),
    }
}

/// A string that may be absent (and then defaults) but never `null`.
fn defaulted_str(parent: &Map<String, Value>, prefix: &str, key: &str) -> Result<(), ValidationError> {
    match parent.get(key) {
        None | Some(Value::String(_)) => Ok(()),
        Some(other) => Err(ValidationError::new(
            format!("{prefix}{key}"),
            format!("expected a string, found {}", describe(other)),
        )),
    }
}

fn optional_str<'a>(
    parent: &'a Map<String, Value>,
    prefix: &str,
    key: &str,
) -> Result<Option<&'a str>, ValidationError> {
    match parent.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ValidationError::new(
            format!("{prefix}{key}"),
            format!("expected a string, found {}", describe(other)),
        )),
    }
}
