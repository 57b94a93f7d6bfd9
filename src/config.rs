//! Editable analysis inputs (course list and scholar ids), persisted as a
//! JSON file so edits survive restarts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs as tokio_fs;
use tracing::info;

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub courses: Vec<String>,
    pub scholar_ids: Vec<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            courses: [
                "Advanced Programming",
                "Algorithm Analysis",
                "Computer Vision",
                "Data Structure",
                "Database Systems",
                "Deep Learning",
                "Machine Learning",
                "Operating Systems",
                "Operations Research",
                "Programming Languages",
                "Software Engineering",
                "Theory of Computation",
            ]
            .map(str::to_string)
            .to_vec(),
            scholar_ids: [
                "HChhDEwAAAAJ",
                "eSspyHIAAAAJ",
                "onm7tt0AAAAJ",
                "ql5JirMAAAAJ",
                "x55q6n0AAAAJ",
            ]
            .map(str::to_string)
            .to_vec(),
        }
    }
}

/// Backing file for [`AnalysisConfig`]. A missing file is seeded with the
/// defaults on first load so the form always shows something editable.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(CONFIG_FILE),
        }
    }

    pub async fn load(&self) -> Result<AnalysisConfig> {
        match tokio_fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let defaults = AnalysisConfig::default();
                self.save(&defaults).await?;
                info!(path = %self.path.display(), "seeded default analysis config");
                Ok(defaults)
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        }
    }

    pub async fn save(&self, config: &AnalysisConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let payload =
            serde_json::to_vec_pretty(config).context("failed to encode analysis config")?;
        tokio_fs::write(&self.path, payload)
            .await
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}
