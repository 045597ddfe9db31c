//! Parser stages: source bytes → canonical document.
//!
//! A parser either hands the source through untouched (the input is already
//! XML) or converts it via the ScienceBeam service. The output is a
//! `Cow<[u8]>`: `Borrowed` means "the source itself", `Owned` means a newly
//! converted document that the pipeline should save.
//!
//! ## Retry Strategy
//!
//! The conversion service usually runs in a container that may still be
//! starting when the pipeline begins. Only connection failures are retried,
//! up to `parse_attempts` times, sleeping `parse_backoff_secs` before each
//! attempt unless the caller manages the service itself. Once the service
//! answers, its status is final: a non-2xx response fails immediately.

use crate::component::{Component, Stage, StageOutput, DEFAULT_COMPONENT_VERSION};
use crate::config::{Endpoint, OsmConfig};
use crate::error::OsmError;
use crate::transport::{HttpRequest, RequestBody, Transport, TransportError};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Docker image of the conversion service.
pub const SCIENCEBEAM_IMAGE: &str = "elifesciences/sciencebeam-parser";

/// A parser stage.
#[derive(Debug, Clone)]
pub enum Parser {
    /// Input is already XML; nothing to do.
    Noop,
    /// Input is PubMed Central XML. Passed through unchanged, but reported
    /// under its own name so extractors can use the richer PMC structure.
    Pmc,
    /// PDF → TEI XML through the ScienceBeam service.
    ScienceBeam(ScienceBeamParser),
}

impl Parser {
    /// Parse `data`.
    pub async fn run<'a>(&self, data: &'a [u8]) -> Result<StageOutput<Cow<'a, [u8]>>, OsmError> {
        match self {
            Parser::Noop | Parser::Pmc => {
                debug!("{}: passing {} bytes through", self.name(), data.len());
                Ok(StageOutput::new(Cow::Borrowed(data), self.component()))
            }
            Parser::ScienceBeam(parser) => {
                let converted = parser.convert(data).await?;
                Ok(StageOutput::new(
                    Cow::Owned(converted),
                    self.component().with_sample(data),
                ))
            }
        }
    }
}

impl Stage for Parser {
    fn component(&self) -> Component {
        match self {
            Parser::Noop => Component::new("NoopParser", DEFAULT_COMPONENT_VERSION),
            Parser::Pmc => Component::new("PMCParser", DEFAULT_COMPONENT_VERSION),
            Parser::ScienceBeam(_) => Component::new("ScienceBeamParser", DEFAULT_COMPONENT_VERSION)
                .with_docker_image(SCIENCEBEAM_IMAGE),
        }
    }
}

/// Client for the ScienceBeam PDF → TEI-XML conversion service.
#[derive(Clone)]
pub struct ScienceBeamParser {
    endpoint: Endpoint,
    attempts: u32,
    backoff: Duration,
    user_managed_compose: bool,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for ScienceBeamParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScienceBeamParser")
            .field("endpoint", &self.endpoint)
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .field("user_managed_compose", &self.user_managed_compose)
            .field("transport", &"<dyn Transport>")
            .finish()
    }
}

impl ScienceBeamParser {
    pub fn new(config: &OsmConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: config.sciencebeam.clone(),
            attempts: config.parse_attempts.max(1),
            backoff: Duration::from_secs(config.parse_backoff_secs),
            user_managed_compose: config.user_managed_compose,
            transport,
        }
    }

    /// Convert a PDF, returning the TEI-XML response body.
    pub async fn convert(&self, pdf: &[u8]) -> Result<Vec<u8>, OsmError> {
        let url = self.endpoint.url();

        for attempt in 1..=self.attempts {
            if !self.user_managed_compose && !self.backoff.is_zero() {
                sleep(self.backoff).await;
            }

            let request = HttpRequest::post(
                url.as_str(),
                RequestBody::file("input.pdf", "application/pdf", pdf.to_vec()),
            )
            .header("Accept", "application/tei+xml");

            match self.transport.send(request).await {
                Ok(response) if response.is_success() => {
                    info!(
                        "Converted {} bytes of PDF into {} bytes of XML (attempt {})",
                        pdf.len(),
                        response.body.len(),
                        attempt
                    );
                    return Ok(response.body);
                }
                Ok(response) => {
                    return Err(OsmError::ConversionFailed {
                        url,
                        status: response.status,
                        body: response.text(),
                    });
                }
                Err(TransportError::Connect(detail)) => {
                    warn!(
                        "Attempt {}/{} for parsing the file failed ({}). \
                         This can happen while the container is starting up.",
                        attempt, self.attempts, detail
                    );
                }
                Err(TransportError::Other(detail)) => return Err(OsmError::Transport(detail)),
            }
        }

        Err(OsmError::ConversionUnavailable {
            url,
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_returns_the_source_untouched() {
        let data = b"<article/>".as_slice();
        let out = Parser::Noop.run(data).await.unwrap();
        assert!(matches!(out.value, Cow::Borrowed(_)));
        assert_eq!(out.value.as_ref(), data);
        assert_eq!(out.component.name, "NoopParser");
    }

    #[tokio::test]
    async fn pmc_has_distinct_identity() {
        let out = Parser::Pmc.run(b"<pmc-articleset/>").await.unwrap();
        assert!(matches!(out.value, Cow::Borrowed(_)));
        assert_eq!(out.component.name, "PMCParser");
        assert!(out.component.sample.is_none());
    }
}
