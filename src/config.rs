//! Configuration for the document pipeline.
//!
//! Every external endpoint and timing knob lives in [`OsmConfig`], built via
//! [`OsmConfigBuilder`] or read from the environment with
//! [`OsmConfig::from_env`]. Stages receive the pieces they need at
//! construction time; nothing reads endpoint globals at run time.
//!
//! # Environment variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `OSM_API` | [`OsmConfig::osm_api`] |
//! | `SCIENCEBEAM_PROTOCOL`, `SCIENCEBEAM_HOST`, `SCIENCEBEAM_PORT` | [`OsmConfig::sciencebeam`] |
//! | `RTRANSPARENT_URL` | [`OsmConfig::rtransparent`] |
//! | `LLM_EXTRACTION_URL` | [`OsmConfig::llm_extraction`] |
//! | `OSM_USER_MANAGED_COMPOSE` | [`OsmConfig::user_managed_compose`] |

use crate::error::OsmError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default base URL of the remote store API.
pub const DEFAULT_OSM_API: &str = "https://osm.pythonaisolutions.com/api";

/// An HTTP endpoint split into the parts deployments usually override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Absolute path, including any trailing slash the service expects.
    pub path: String,
}

impl Endpoint {
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// Parse `protocol://host:port/path`. The port defaults from the protocol.
    pub fn parse(url: &str) -> Result<Self, OsmError> {
        let invalid = || OsmError::InvalidConfig(format!("'{url}' is not an http(s) URL"));
        let parsed = reqwest::Url::parse(url).map_err(|_| invalid())?;
        let host = parsed.host_str().ok_or_else(invalid)?.to_string();
        let port = parsed.port_or_known_default().ok_or_else(invalid)?;
        Ok(Self {
            protocol: parsed.scheme().to_string(),
            host,
            port,
            path: parsed.path().to_string(),
        })
    }

    /// Full URL of the endpoint.
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.protocol, self.host, self.port, self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Configuration for one pipeline run.
///
/// The defaults match a docker-compose deployment in which the conversion
/// service runs as `sciencebeam` and the extraction services are published
/// on localhost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsmConfig {
    /// PDF → TEI-XML conversion service. Default: `http://sciencebeam:8070/api/convert`.
    pub sciencebeam: Endpoint,

    /// rtransparent extraction service. Default: `http://localhost:8071/extract-metrics/`.
    pub rtransparent: Endpoint,

    /// LLM extraction service. Default: `http://localhost:8072/extract-metrics/`.
    pub llm_extraction: Endpoint,

    /// Base URL of the remote store API (upload and quarantine endpoints hang off it).
    pub osm_api: String,

    /// Connection attempts made against the conversion service. Default: 5.
    ///
    /// Only connection failures are retried: a container that is still
    /// starting refuses connections for a while. An HTTP error status is
    /// never retried.
    pub parse_attempts: u32,

    /// Sleep before each conversion attempt, in seconds. Default: 10.
    pub parse_backoff_secs: u64,

    /// The conversion service is managed (and already running) outside this
    /// process, so the pre-attempt backoff is skipped. Default: false.
    pub user_managed_compose: bool,

    /// Per-request timeout for every backend call, in seconds. Default: 300.
    pub request_timeout_secs: u64,
}

impl Default for OsmConfig {
    fn default() -> Self {
        Self {
            sciencebeam: Endpoint::new("http", "sciencebeam", 8070, "/api/convert"),
            rtransparent: Endpoint::new("http", "localhost", 8071, "/extract-metrics/"),
            llm_extraction: Endpoint::new("http", "localhost", 8072, "/extract-metrics/"),
            osm_api: DEFAULT_OSM_API.to_string(),
            parse_attempts: 5,
            parse_backoff_secs: 10,
            user_managed_compose: false,
            request_timeout_secs: 300,
        }
    }
}

impl OsmConfig {
    /// Create a new builder for `OsmConfig`.
    pub fn builder() -> OsmConfigBuilder {
        OsmConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a config from the process environment (and a `.env` file, if any).
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, OsmError> {
        // A missing .env file is the common case.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, OsmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(api) = get("OSM_API") {
            builder = builder.osm_api(api);
        }

        let mut sb = builder.config.sciencebeam.clone();
        if let Some(protocol) = get("SCIENCEBEAM_PROTOCOL") {
            sb.protocol = protocol;
        }
        if let Some(host) = get("SCIENCEBEAM_HOST") {
            sb.host = host;
        }
        if let Some(port) = get("SCIENCEBEAM_PORT") {
            sb.port = port.trim().parse().map_err(|_| {
                OsmError::InvalidConfig(format!("SCIENCEBEAM_PORT must be a port number, got '{port}'"))
            })?;
        }
        builder = builder.sciencebeam(sb);

        if let Some(url) = get("RTRANSPARENT_URL") {
            builder = builder.rtransparent(Endpoint::parse(&url)?);
        }
        if let Some(url) = get("LLM_EXTRACTION_URL") {
            builder = builder.llm_extraction(Endpoint::parse(&url)?);
        }
        if let Some(flag) = get("OSM_USER_MANAGED_COMPOSE") {
            builder = builder.user_managed_compose(parse_flag(&flag));
        }

        builder.build()
    }

    /// URL of an endpoint under [`OsmConfig::osm_api`], e.g. `api_url("upload")`.
    pub fn api_url(&self, route: &str) -> String {
        format!("{}/{}/", self.osm_api.trim_end_matches('/'), route)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Builder for [`OsmConfig`].
#[derive(Debug)]
pub struct OsmConfigBuilder {
    config: OsmConfig,
}

impl OsmConfigBuilder {
    pub fn sciencebeam(mut self, endpoint: Endpoint) -> Self {
        self.config.sciencebeam = endpoint;
        self
    }

    pub fn rtransparent(mut self, endpoint: Endpoint) -> Self {
        self.config.rtransparent = endpoint;
        self
    }

    pub fn llm_extraction(mut self, endpoint: Endpoint) -> Self {
        self.config.llm_extraction = endpoint;
        self
    }

    pub fn osm_api(mut self, url: impl Into<String>) -> Self {
        self.config.osm_api = url.into();
        self
    }

    pub fn parse_attempts(mut self, n: u32) -> Self {
        self.config.parse_attempts = n.max(1);
        self
    }

    pub fn parse_backoff_secs(mut self, secs: u64) -> Self {
        self.config.parse_backoff_secs = secs;
        self
    }

    pub fn user_managed_compose(mut self, v: bool) -> Self {
        self.config.user_managed_compose = v;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OsmConfig, OsmError> {
        let c = &self.config;
        if c.parse_attempts == 0 {
            return Err(OsmError::InvalidConfig(
                "parse_attempts must be ≥ 1".into(),
            ));
        }
        if c.osm_api.trim().is_empty() {
            return Err(OsmError::InvalidConfig("osm_api must not be empty".into()));
        }
        for (name, endpoint) in [
            ("sciencebeam", &c.sciencebeam),
            ("rtransparent", &c.rtransparent),
            ("llm_extraction", &c.llm_extraction),
        ] {
            if endpoint.protocol != "http" && endpoint.protocol != "https" {
                return Err(OsmError::InvalidConfig(format!(
                    "{name} protocol must be http or https, got '{}'",
                    endpoint.protocol
                )));
            }
        }
        Ok(self.config)
    }
}
