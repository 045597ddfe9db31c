//! The document pipeline orchestrator.
//!
//! One [`Pipeline`] drives one source document through every configured
//! parser and, for each parser output, through every configured extractor.
//! Each (parser, extractor) combination ends in a validated record handed
//! to [`OsmSaver`].
//!
//! Stages run strictly one after another in declared order. The first
//! fatal error ends the run; combinations after it are not attempted.

use crate::component::{Component, Stage};
use crate::error::OsmError;
use crate::pipeline::extractors::Extractor;
use crate::pipeline::parsers::Parser;
use crate::pipeline::savers::{FileSaver, JsonSaver};
use crate::pipeline::upload::OsmSaver;
use crate::schema::{Invocation, Metrics};
use serde::Serialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// The savers a pipeline writes through.
#[derive(Debug, Clone)]
pub struct Savers {
    pub file: FileSaver,
    pub json: JsonSaver,
    pub osm: OsmSaver,
}

impl Savers {
    pub fn new(osm: OsmSaver) -> Self {
        Self {
            file: FileSaver,
            json: JsonSaver,
            osm,
        }
    }
}

/// Result of one (parser, extractor) combination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRecord {
    pub parser: String,
    pub extractor: String,
    /// The record as delivered, metrics and provenance included.
    pub invocation: Invocation,
}

impl PipelineRecord {
    pub fn metrics(&self) -> &Metrics {
        &self.invocation.metrics
    }
}

/// Everything a successful run delivered, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineOutput {
    pub records: Vec<PipelineRecord>,
}

/// A single-use pipeline over one source document.
#[derive(Debug)]
pub struct Pipeline {
    parsers: Vec<Parser>,
    extractors: Vec<Extractor>,
    savers: Savers,
    filepath: PathBuf,
    xml_path: PathBuf,
    metrics_path: PathBuf,
}

impl Pipeline {
    /// Build a pipeline.
    ///
    /// `xml_path` receives converted documents and `metrics_path` the JSON
    /// metrics. With several combinations each one overwrites the previous
    /// local copy; the remote store keeps every record.
    pub fn new(
        parsers: Vec<Parser>,
        extractors: Vec<Extractor>,
        savers: Savers,
        filepath: impl Into<PathBuf>,
        xml_path: impl Into<PathBuf>,
        metrics_path: impl Into<PathBuf>,
    ) -> Result<Self, OsmError> {
        if parsers.is_empty() {
            return Err(OsmError::InvalidConfig("at least one parser is required".into()));
        }
        if extractors.is_empty() {
            return Err(OsmError::InvalidConfig("at least one extractor is required".into()));
        }
        Ok(Self {
            parsers,
            extractors,
            savers,
            filepath: filepath.into(),
            xml_path: xml_path.into(),
            metrics_path: metrics_path.into(),
        })
    }

    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    /// Run every combination and deliver its record.
    ///
    /// The local metrics JSON is written before delivery, so it survives a
    /// failed upload.
    pub async fn run(self) -> Result<PipelineOutput, OsmError> {
        let start = Instant::now();
        info!("Processing {}", self.filepath.display());
        let data = read_source(&self.filepath).await?;
        debug!("Read {} bytes from {}", data.len(), self.filepath.display());

        let local_savers: [Component; 2] = [self.savers.file.component(), self.savers.json.component()];
        let mut output = PipelineOutput::default();

        for parser in &self.parsers {
            let parsed = parser.run(&data).await?;
            let parser_name = parsed.component.name.clone();
            info!("{} finished", parser_name);

            if let Cow::Owned(converted) = &parsed.value {
                self.savers.file.run(converted, &self.xml_path).await?;
            }

            for extractor in &self.extractors {
                let extracted = extractor.run(&parsed.value, Some(&parser_name)).await?;
                let extractor_name = extracted.component.name.clone();

                self.savers.json.run(&extracted.value, &self.metrics_path).await?;

                let mut components = vec![parsed.component.clone(), extracted.component];
                components.extend(local_savers.iter().cloned());

                let invocation = self
                    .savers
                    .osm
                    .run(&data, &extracted.value, &components, extractor.metrics_schema())
                    .await?;
                output.records.push(PipelineRecord {
                    parser: parser_name.clone(),
                    extractor: extractor_name,
                    invocation,
                });
            }
        }

        info!(
            "Pipeline complete: {} record(s) in {}ms",
            output.records.len(),
            start.elapsed().as_millis()
        );
        Ok(output)
    }

    /// Synchronous wrapper around [`Pipeline::run`].
    ///
    /// Creates a temporary current-thread tokio runtime internally, so it must
    /// not be called from inside an async context.
    pub fn run_blocking(self) -> Result<PipelineOutput, OsmError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| OsmError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run())
    }
}

async fn read_source(path: &Path) -> Result<Vec<u8>, OsmError> {
    tokio::fs::read(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            OsmError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            OsmError::FileReadFailed {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}
