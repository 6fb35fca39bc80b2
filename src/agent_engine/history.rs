use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::{RunOutcome, StepRecord};
use crate::errors::MarksmanResult;

pub const MANIFEST_FILE: &str = "manifest.json";

/// The per-run record written once at the end of every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub task: String,
    pub run_id: String,
    pub outcome: RunOutcome,
    pub states: Vec<StepRecord>,
}

/// Output directory of one run: screenshots plus the manifest.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn create(dir: impl Into<PathBuf>) -> MarksmanResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `step_{n}_{ms}.png`, or `step_{n}_{label}_{ms}.png` for audit shots.
    pub fn screenshot_name(step: u32, label: Option<&str>) -> String {
        let ts = chrono::Utc::now().timestamp_millis();
        match label {
            Some(label) => format!("step_{step}_{label}_{ts}.png"),
            None => format!("step_{step}_{ts}.png"),
        }
    }

    pub fn save_png(&self, name: &str, bytes: &[u8]) -> MarksmanResult<PathBuf> {
        let path = self.dir.join(name);
        std::fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "screenshot saved");
        Ok(path)
    }

    pub fn write_manifest(&self, manifest: &Manifest) -> MarksmanResult<PathBuf> {
        let path = self.dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(manifest)?;
        std::fs::write(&path, json)?;
        tracing::info!(
            path = %path.display(),
            steps = manifest.states.len(),
            "manifest written"
        );
        Ok(path)
    }
}

pub fn read_manifest(path: &Path) -> MarksmanResult<Manifest> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
