//! Extractor stages: canonical document → flat indicator mapping.
//!
//! Both extractors post the document to an HTTP service and receive a JSON
//! object. They differ in the query parameter they send and in
//! post-processing: rtransparent responses are scrubbed by
//! [`scrub_rtransparent`] before they reach the pipeline.
//!
//! Errors are never retried here. A failing extraction backend fails the
//! (parser, extractor) combination it was asked to serve.

use crate::component::{Component, Stage, StageOutput, DEFAULT_COMPONENT_VERSION};
use crate::config::{Endpoint, OsmConfig};
use crate::error::OsmError;
use crate::schema::{Metrics, MetricsSchema};
use crate::transport::{HttpRequest, RequestBody, Transport, TransportError};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// rtransparent's "not available": an R `NA_integer_` seen as a signed 32-bit minimum.
pub const NA_SENTINEL: i64 = i32::MIN as i64;

/// Docker image of the rtransparent service.
pub const RTRANSPARENT_IMAGE: &str = "nimhdsst/rtransparent";

/// Default model requested from the LLM extraction service.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-2024-08-06";

/// An extractor stage.
#[derive(Debug, Clone)]
pub enum Extractor {
    RTransparent(RTransparentExtractor),
    Llm(LlmExtractor),
}

impl Extractor {
    /// Extract metrics from `document`.
    ///
    /// `parser` names the stage that produced the document; rtransparent
    /// picks its extraction strategy from it. The LLM extractor ignores it.
    pub async fn run(
        &self,
        document: &[u8],
        parser: Option<&str>,
    ) -> Result<StageOutput<Metrics>, OsmError> {
        let name = self.name();
        let metrics = match self {
            Extractor::RTransparent(e) => {
                let query: Vec<(String, String)> = parser
                    .map(|p| vec![("parser".to_string(), p.to_string())])
                    .unwrap_or_default();
                let raw = post_document(e.transport.as_ref(), &e.endpoint, &name, document, query).await?;
                scrub_rtransparent(raw)
            }
            Extractor::Llm(e) => {
                let query = vec![("llm_model".to_string(), e.model.clone())];
                post_document(e.transport.as_ref(), &e.endpoint, &name, document, query).await?
            }
        };
        info!("{}: extracted {} fields", name, metrics.len());
        Ok(StageOutput::new(metrics, self.component().with_sample(document)))
    }

    /// Schema the produced metrics are validated against.
    pub fn metrics_schema(&self) -> MetricsSchema {
        match self {
            Extractor::RTransparent(_) => MetricsSchema::RTransparent,
            Extractor::Llm(_) => MetricsSchema::Llm,
        }
    }
}

impl Stage for Extractor {
    fn component(&self) -> Component {
        match self {
            Extractor::RTransparent(_) => {
                Component::new("RTransparentExtractor", DEFAULT_COMPONENT_VERSION)
                    .with_docker_image(RTRANSPARENT_IMAGE)
            }
            Extractor::Llm(_) => Component::new("LLMExtractor", DEFAULT_COMPONENT_VERSION),
        }
    }
}

/// Client for the rtransparent extraction service.
#[derive(Clone)]
pub struct RTransparentExtractor {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
}

impl RTransparentExtractor {
    pub fn new(config: &OsmConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: config.rtransparent.clone(),
            transport,
        }
    }
}

impl fmt::Debug for RTransparentExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RTransparentExtractor")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Client for the LLM extraction service.
#[derive(Clone)]
pub struct LlmExtractor {
    endpoint: Endpoint,
    model: String,
    transport: Arc<dyn Transport>,
}

impl LlmExtractor {
    pub fn new(config: &OsmConfig, model: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: config.llm_extraction.clone(),
            model: model.into(),
            transport,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl fmt::Debug for LlmExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmExtractor")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Post `document` as an XML file upload and decode the JSON object reply.
async fn post_document(
    transport: &dyn Transport,
    endpoint: &Endpoint,
    extractor: &str,
    document: &[u8],
    query: Vec<(String, String)>,
) -> Result<Metrics, OsmError> {
    let mut request = HttpRequest::post(
        endpoint.url(),
        RequestBody::file("input.xml", "application/xml", document.to_vec()),
    );
    request.query = query;
    debug!("{}: posting {} bytes to {}", extractor, document.len(), endpoint);

    let response = transport.send(request).await.map_err(|e| match e {
        TransportError::Connect(detail) => {
            OsmError::Transport(format!("{extractor} at {endpoint} is unreachable: {detail}"))
        }
        TransportError::Other(detail) => OsmError::Transport(format!("{extractor}: {detail}")),
    })?;

    if !response.is_success() {
        error!("{}: HTTP {}: {}", extractor, response.status, response.text());
        return Err(OsmError::ExtractionFailed {
            extractor: extractor.to_string(),
            status: response.status,
            body: response.text(),
        });
    }

    match serde_json::from_slice::<Value>(&response.body) {
        Ok(Value::Object(metrics)) => Ok(metrics),
        Ok(other) => Err(OsmError::InvalidMetrics {
            extractor: extractor.to_string(),
            detail: format!("expected a JSON object, got {}", crate::schema::metrics::json_type_name(&other)),
        }),
        Err(e) => Err(OsmError::InvalidMetrics {
            extractor: extractor.to_string(),
            detail: e.to_string(),
        }),
    }
}

/// Clean an rtransparent response.
///
/// 1. `pmid` is dropped: rtransparent derives it from the input filename,
///    which the pipeline controls, so the value is meaningless.
/// 2. Every value equal to [`NA_SENTINEL`] becomes `null`.
pub fn scrub_rtransparent(mut metrics: Metrics) -> Metrics {
    metrics.remove("pmid");
    for value in metrics.values_mut() {
        if is_na_sentinel(value) {
            *value = Value::Null;
        }
    }
    metrics
}

fn is_na_sentinel(value: &Value) -> bool {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i == NA_SENTINEL,
            None => n.as_f64() == Some(NA_SENTINEL as f64),
        },
        _ => false,
    }
}
