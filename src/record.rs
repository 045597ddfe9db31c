//! Candidate record assembly.
//!
//! Turns pipeline state (source bytes, metrics, provenance) plus the
//! caller-supplied [`RecordContext`] into the untyped candidate payload that
//! [`crate::schema::validate_candidate`] checks. The candidate stays a
//! `serde_json::Value` until validation so that a malformed record can still
//! be quarantined verbatim.

use crate::component::Component;
use crate::error::OsmError;
use crate::schema::Metrics;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Version stamped into every record.
pub const OSM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of distinct compute-context ids.
const COMPUTE_CONTEXT_BUCKETS: u64 = 10_000;

/// SHA-256 of `data`, lowercase hex.
pub fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Fingerprint of a host/user pair, folded into `0..10_000`.
///
/// Deliberately coarse: it groups runs from one machine and account without
/// identifying either, and two contexts may share an id.
pub fn compute_context_id_for(host: &str, user: &str) -> u32 {
    let digest = Sha256::digest(format!("{host}_{user}").as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % COMPUTE_CONTEXT_BUCKETS) as u32
}

/// [`compute_context_id_for`] the current host and user.
pub fn compute_context_id() -> u32 {
    compute_context_id_for(&current_host(), &current_user())
}

/// `$HOSTNAME` if set, else the system host name.
fn current_host() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            gethostname::gethostname()
                .into_string()
                .ok()
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown-host".to_string())
}

pub(crate) fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

/// Who and what a record is about. Fixed for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContext {
    pub user_defined_id: String,
    pub filename: String,
    pub pmid: Option<String>,
    pub doi: Option<String>,
    pub user_comment: String,
    pub email: Option<String>,
    pub data_tags: Vec<String>,
    pub compute_context_id: u32,
}

impl RecordContext {
    /// Context for the current host and user.
    pub fn new(user_defined_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            user_defined_id: user_defined_id.into(),
            filename: filename.into(),
            pmid: None,
            doi: None,
            user_comment: String::new(),
            email: None,
            data_tags: Vec::new(),
            compute_context_id: compute_context_id(),
        }
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.user_comment = comment.into();
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn pmid(mut self, pmid: impl Into<String>) -> Self {
        self.pmid = Some(pmid.into());
        self
    }

    pub fn doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    pub fn data_tags(mut self, tags: Vec<String>) -> Self {
        self.data_tags = tags;
        self
    }
}

/// Funder tags carried by the metrics, if any.
///
/// A single string becomes a one-element list; a list keeps its string items.
pub fn funder_tags(metrics: &Metrics) -> Vec<String> {
    match metrics.get("funder") {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Assemble the candidate payload for one (parser, extractor) pairing.
pub fn assemble_candidate(
    data: &[u8],
    metrics: &Metrics,
    components: &[Component],
    context: &RecordContext,
    created_at: DateTime<Utc>,
) -> Result<Value, OsmError> {
    let components = serde_json::to_value(components)
        .map_err(|e| OsmError::PayloadAssembly(format!("components: {e}")))?;
    let metrics_value = serde_json::to_value(metrics)
        .map_err(|e| OsmError::PayloadAssembly(format!("metrics: {e}")))?;

    Ok(json!({
        "osm_version": OSM_VERSION,
        "user_comment": context.user_comment,
        "work": {
            "user_defined_id": context.user_defined_id,
            "pmid": context.pmid,
            "doi": context.doi,
            "filename": context.filename,
            "content_hash": content_hash(data),
        },
        "client": {
            "compute_context_id": context.compute_context_id,
            "email": context.email,
        },
        "metrics": metrics_value,
        "components": components,
        "funder": funder_tags(metrics),
        "data_tags": context.data_tags,
        "created_at": created_at.to_rfc3339(),
    }))
}
