//! # osm-pipeline
//!
//! Extract open-science transparency indicators (data sharing, code sharing,
//! funding, conflicts of interest, registration) from biomedical
//! publications, and record every result in a remote store without ever
//! losing one silently.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / XML
//!  │
//!  ├─ 1. Parse     pass XML through, or PDF → TEI XML via ScienceBeam
//!  ├─ 2. Extract   rtransparent or LLM service → flat metrics mapping
//!  ├─ 3. Save      local copies of the XML and the metrics JSON
//!  ├─ 4. Assemble  candidate record: work, client, metrics, provenance
//!  ├─ 5. Validate  schema checks with dotted field paths
//!  └─ 6. Deliver   upload; on failure quarantine (JSON, then raw file)
//! ```
//!
//! Every parser is combined with every extractor, and each combination
//! produces one [`Invocation`](schema::Invocation).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use osm_pipeline::pipeline::extractors::{Extractor, RTransparentExtractor};
//! use osm_pipeline::pipeline::parsers::Parser;
//! use osm_pipeline::pipeline::upload::OsmSaver;
//! use osm_pipeline::{OsmConfig, Pipeline, RecordContext, ReqwestTransport, Savers, Transport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OsmConfig::from_env()?;
//!     let transport: Arc<dyn Transport> =
//!         Arc::new(ReqwestTransport::new(config.request_timeout_secs)?);
//!
//!     let context = RecordContext::new("PMC1234567", "paper.xml");
//!     let osm = OsmSaver::new(&config, context, Arc::clone(&transport));
//!     let extractor = Extractor::RTransparent(RTransparentExtractor::new(&config, transport));
//!
//!     let output = Pipeline::new(
//!         vec![Parser::Noop],
//!         vec![extractor],
//!         Savers::new(osm),
//!         "paper.xml",
//!         "osm_output/paper.xml",
//!         "osm_output/paper_metrics.json",
//!     )?
//!     .run()
//!     .await?;
//!     eprintln!("delivered {} record(s)", output.records.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Handling
//!
//! A record that fails validation, or that the store rejects, is
//! quarantined and the error is still returned. A store that cannot be
//! reached at all is an environment error and nothing is quarantined. See
//! [`pipeline::upload`] and [`ErrorKind`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `osm` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod component;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod record;
pub mod schema;
pub mod transport;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use component::{Component, Stage, StageOutput};
pub use config::{Endpoint, OsmConfig, OsmConfigBuilder};
pub use error::{ErrorKind, OsmError, ValidationError};
pub use process::{Pipeline, PipelineOutput, PipelineRecord, Savers};
pub use record::RecordContext;
pub use schema::{Client, Invocation, Metrics, MetricsSchema, Work};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
