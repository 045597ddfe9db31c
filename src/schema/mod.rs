//! Records exchanged with the remote store.
//!
//! [`Invocation`] is the canonical result of one (parser, extractor)
//! pairing over one document. It is only ever constructed from a candidate
//! JSON payload by [`validate_candidate`], so an `Invocation` value is
//! proof that the payload passed the schema. [`Quarantine`] and
//! [`PayloadError`] are the records written when that fails.

pub mod metrics;
mod validate;

pub use metrics::{FieldType, Metrics, MetricsSchema};
pub use validate::validate_candidate;

use crate::component::Component;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of the source document.
///
/// Any of the identifiers may be the one a user knows the work by; none is
/// mandatory beyond `user_defined_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    pub user_defined_id: String,
    #[serde(default)]
    pub pmid: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub openalex_id: Option<String>,
    #[serde(default)]
    pub scopus_id: Option<String>,
    #[serde(default)]
    pub filename: String,
    /// SHA-256 of the raw source bytes, lowercase hex.
    pub content_hash: String,
}

/// Who ran the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Coarse host+user fingerprint. Collisions are expected.
    pub compute_context_id: u32,
    #[serde(default)]
    pub email: Option<String>,
}

/// A validated result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub osm_version: String,
    #[serde(default)]
    pub user_comment: String,
    pub client: Client,
    pub work: Work,
    pub metrics: Metrics,
    /// Stages that produced this record, in execution order.
    pub components: Vec<Component>,
    #[serde(default)]
    pub funder: Vec<String>,
    #[serde(default)]
    pub data_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A candidate record that failed validation or delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quarantine {
    /// Base64 of the serialised candidate payload.
    pub payload: String,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

/// Recorded when a candidate payload could not be assembled at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadError {
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}
