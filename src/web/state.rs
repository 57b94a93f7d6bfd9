use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tracing::info;

use crate::{
    analysis::AnalysisPipeline,
    config::ConfigStore,
    embedding::EmbeddingClient,
    jobs::AnalysisJobRunner,
    scholar::HttpScholarSource,
};

#[derive(Clone)]
pub struct AppState {
    config: ConfigStore,
    runner: Arc<AnalysisJobRunner>,
    results_dir: PathBuf,
}

impl AppState {
    /// Builds the shared state from the environment: the embeddings client,
    /// the cached scholar source, and the directories for results, config,
    /// and the publication cache.
    pub fn from_env() -> Result<Self> {
        let results_dir = dir_from_env("RESULTS_DIR", "results");
        let config_dir = dir_from_env("CONFIG_DIR", "config");
        let cache_dir = dir_from_env("CACHE_DIR", "cache");

        let embedder = EmbeddingClient::from_env()
            .context("failed to initialize embeddings client")?;
        let scholars = HttpScholarSource::from_env(cache_dir.clone());

        let pipeline = AnalysisPipeline::new(Arc::new(embedder), Arc::new(scholars));
        let runner = Arc::new(AnalysisJobRunner::new(pipeline, results_dir.clone()));

        info!(
            results = %results_dir.display(),
            config = %config_dir.display(),
            cache = %cache_dir.display(),
            "application state ready"
        );

        Ok(Self {
            config: ConfigStore::new(&config_dir),
            runner,
            results_dir,
        })
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    pub fn runner(&self) -> &Arc<AnalysisJobRunner> {
        &self.runner
    }

    pub fn results_dir(&self) -> &PathBuf {
        &self.results_dir
    }
}

fn dir_from_env(var: &str, default: &str) -> PathBuf {
    env::var(var).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}
