//! Stage identity and provenance.
//!
//! Every stage reports who it is through the [`Stage`] trait, and every
//! stage run hands back a [`StageOutput`]: the transformed value plus the
//! [`Component`] provenance entry describing the stage that produced it.
//! The pipeline collects those entries in execution order and ships them
//! with the invocation record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version reported by stages that have not declared their own.
pub const DEFAULT_COMPONENT_VERSION: &str = "0.0.1";

/// Number of leading bytes kept in a [`Sample`].
const SAMPLE_LEN: usize = 64;

/// Provenance entry for one stage of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image_id: Option<String>,
    /// Leading bytes of what the stage processed. Never serialised.
    #[serde(skip)]
    pub sample: Option<Sample>,
}

impl Component {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            docker_image: None,
            docker_image_id: None,
            sample: None,
        }
    }

    pub fn with_docker_image(mut self, image: impl Into<String>) -> Self {
        self.docker_image = Some(image.into());
        self
    }

    pub fn with_sample(mut self, data: &[u8]) -> Self {
        self.sample = Some(Sample::of(data));
        self
    }
}

/// A short copy of stage input that never prints its contents.
///
/// `Debug` and `Display` show `...` (or nothing for an empty sample) so the
/// bytes cannot leak into logs or error messages; [`Sample::bytes`] gives
/// deliberate access.
#[derive(Clone, PartialEq, Eq)]
pub struct Sample(Vec<u8>);

impl Sample {
    pub fn of(data: &[u8]) -> Self {
        Sample(data[..data.len().min(SAMPLE_LEN)].to_vec())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            Ok(())
        } else {
            f.write_str("...")
        }
    }
}

/// The result of running a stage: its output and its provenance entry.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub value: T,
    pub component: Component,
}

impl<T> StageOutput<T> {
    pub fn new(value: T, component: Component) -> Self {
        Self { value, component }
    }
}

/// Identity shared by every pipeline stage.
pub trait Stage {
    /// Provenance entry for this stage, without a sample.
    fn component(&self) -> Component;

    fn name(&self) -> String {
        self.component().name
    }
}
