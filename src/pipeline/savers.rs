//! Local auxiliary savers.
//!
//! Both write atomically (temp file + rename) so an interrupted run never
//! leaves a half-written output behind. Errors are plain I/O propagation;
//! these copies are a convenience for the user, not the record of truth.

use crate::component::{Component, Stage, StageOutput, DEFAULT_COMPONENT_VERSION};
use crate::error::OsmError;
use crate::schema::Metrics;
use std::path::Path;
use tracing::info;

/// Writes the converted document verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSaver;

impl FileSaver {
    pub async fn run(&self, data: &[u8], path: &Path) -> Result<StageOutput<()>, OsmError> {
        write_atomic(path, data).await?;
        info!("Data saved to {}", path.display());
        Ok(StageOutput::new((), self.component()))
    }
}

impl Stage for FileSaver {
    fn component(&self) -> Component {
        Component::new("FileSaver", DEFAULT_COMPONENT_VERSION)
    }
}

/// Writes extracted metrics as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSaver;

impl JsonSaver {
    pub async fn run(&self, metrics: &Metrics, path: &Path) -> Result<StageOutput<()>, OsmError> {
        let json = serde_json::to_vec(metrics)
            .map_err(|e| OsmError::Internal(format!("metrics are not serialisable: {e}")))?;
        write_atomic(path, &json).await?;
        info!("Metrics saved to {}", path.display());
        Ok(StageOutput::new((), self.component()))
    }
}

impl Stage for JsonSaver {
    fn component(&self) -> Component {
        Component::new("JSONSaver", DEFAULT_COMPONENT_VERSION)
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), OsmError> {
    let write_failed = |source| OsmError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, data).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}
