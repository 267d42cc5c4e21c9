//! Session configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::drc::DEFAULT_THREADS;

/// Where incremental jobs run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// On the thread that ends the edit batch
    Inline,
    /// On the session's serialized worker thread
    #[default]
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrcConfig {
    /// Layer-task worker pool size; 0 or 1 runs tasks sequentially
    pub num_threads: usize,
    pub incremental: bool,
    /// When off, the minimum node size pass runs instead of layer area checks
    pub area_checking: bool,
    pub job_mode: JobMode,
}

impl Default for DrcConfig {
    fn default() -> Self {
        Self {
            num_threads: DEFAULT_THREADS,
            incremental: true,
            area_checking: true,
            job_mode: JobMode::Background,
        }
    }
}

impl DrcConfig {
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}
