//! Pipeline stages for document processing.
//!
//! Each submodule implements one kind of stage. Stages are tagged unions
//! (or unit structs) sharing the same shape: an async `run` returning a
//! [`crate::component::StageOutput`] that carries the stage's provenance.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ parser ──▶ extractor ──▶ upload
//! (bytes)    (XML)      (metrics)     (validated record / quarantine)
//!               │            │
//!               ▼            ▼
//!           FileSaver    JsonSaver
//! ```
//!
//! 1. [`parsers`]    — pass XML through, or convert PDF via ScienceBeam with
//!    connection retry
//! 2. [`extractors`] — rtransparent or LLM metrics extraction
//! 3. [`savers`]     — local copies of the converted document and metrics
//! 4. [`upload`]     — validated delivery to the remote store, with
//!    two-tier quarantine fallback

pub mod extractors;
pub mod parsers;
pub mod savers;
pub mod upload;
