//! Error types for the osm-pipeline library.
//!
//! Every fatal failure is an [`OsmError`]. Callers that need to branch on the
//! *class* of failure rather than the exact variant use [`OsmError::kind`],
//! which folds the variants into the [`ErrorKind`] taxonomy:
//!
//! * [`ErrorKind::Validation`] — the assembled record fails schema checks.
//!   The record has been quarantined; never retry the same payload.
//! * [`ErrorKind::Delivery`] — the remote store was reached but rejected the
//!   record. The record has been quarantined.
//! * [`ErrorKind::StoreConnectivity`] — the remote store could not be reached
//!   at all. Nothing was quarantined; this is an environment problem.
//! * [`ErrorKind::ExternalService`] — a conversion or extraction backend
//!   failed.
//!
//! A quarantined failure is still an error: the record was preserved, but
//! the intended delivery did not happen.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the osm-pipeline library.
#[derive(Debug, Error)]
pub enum OsmError {
    // ── Input / output errors ─────────────────────────────────────────────
    /// Input document was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The input document exists but could not be read.
    #[error("Failed to read input file '{path}': {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write a local output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Refusing to clobber an output from a previous run.
    #[error("Output file '{path}' already exists.\nRemove it or pass --overwrite.")]
    OutputExists { path: PathBuf },

    // ── Parser errors ─────────────────────────────────────────────────────
    /// The conversion backend never accepted a connection.
    #[error(
        "Conversion service at '{url}' could not be reached after {attempts} attempts.\n\
This can happen while its container is starting; check it is running."
    )]
    ConversionUnavailable { url: String, attempts: u32 },

    /// The conversion backend answered with a non-success status.
    #[error("Conversion service at '{url}' returned HTTP {status}: {body}")]
    ConversionFailed {
        url: String,
        status: u16,
        body: String,
    },

    // ── Extractor errors ──────────────────────────────────────────────────
    /// The extraction backend answered with a non-success status.
    #[error("{extractor} failed with HTTP {status}: {body}")]
    ExtractionFailed {
        extractor: String,
        status: u16,
        body: String,
    },

    /// The extraction backend answered 2xx but not with a flat JSON object.
    #[error("{extractor} returned unusable metrics: {detail}")]
    InvalidMetrics { extractor: String, detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// The candidate record could not even be assembled.
    #[error("Failed to assemble invocation payload: {0}")]
    PayloadAssembly(String),

    /// The assembled record failed schema validation.
    #[error("Invocation failed validation: {0}")]
    Validation(#[from] ValidationError),

    /// The remote store was reached but did not accept the record.
    #[error("Failed to upload invocation data (HTTP {status}):\n {body}")]
    DeliveryRejected { status: u16, body: String },

    /// The remote store was reached but the exchange broke off (timeout,
    /// truncated response) before it accepted the record.
    #[error("Upload to OSM API ({url}) did not complete: {detail}")]
    DeliveryInterrupted { url: String, detail: String },

    /// The remote store could not be reached; nothing was quarantined.
    #[error("Cannot connect to OSM API ({url}): {detail}")]
    StoreUnreachable { url: String, detail: String },

    /// Both quarantine tiers failed; the record only exists in memory.
    #[error(
        "{original}\n\nThe record could not be quarantined either:\n  \
quarantine: {tier1}\n  quarantine2: {tier2}"
    )]
    QuarantineFailed {
        original: Box<OsmError>,
        tier1: String,
        tier2: String,
    },

    // ── Transport errors ──────────────────────────────────────────────────
    /// A backend was reached but the exchange failed (timeout, bad body).
    #[error("HTTP transport error: {0}")]
    Transport(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`OsmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Structural: the record is malformed. Quarantined, never retried.
    Validation,
    /// The store rejected the record. Quarantined.
    Delivery,
    /// The store is unreachable. Not quarantined.
    StoreConnectivity,
    /// A conversion or extraction backend failed.
    ExternalService,
    /// Local file-system failure.
    Io,
    /// Bad configuration.
    Config,
    /// Anything else.
    Internal,
}

impl OsmError {
    /// Classify this error.
    ///
    /// [`OsmError::QuarantineFailed`] reports the kind of the error that
    /// triggered quarantine.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OsmError::FileNotFound { .. }
            | OsmError::FileReadFailed { .. }
            | OsmError::OutputWriteFailed { .. }
            | OsmError::OutputExists { .. } => ErrorKind::Io,
            OsmError::ConversionUnavailable { .. }
            | OsmError::ConversionFailed { .. }
            | OsmError::ExtractionFailed { .. }
            | OsmError::InvalidMetrics { .. }
            | OsmError::Transport(_) => ErrorKind::ExternalService,
            OsmError::Validation(_) => ErrorKind::Validation,
            OsmError::DeliveryRejected { .. } | OsmError::DeliveryInterrupted { .. } => {
                ErrorKind::Delivery
            }
            OsmError::StoreUnreachable { .. } => ErrorKind::StoreConnectivity,
            OsmError::QuarantineFailed { original, .. } => original.kind(),
            OsmError::InvalidConfig(_) => ErrorKind::Config,
            OsmError::PayloadAssembly(_) | OsmError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the failing record was preserved in (or attempted for) quarantine.
    pub fn is_quarantinable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Delivery)
    }
}

/// A schema violation in a candidate invocation record.
///
/// `field` is the dotted path of the offending value, e.g. `work.filename`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
