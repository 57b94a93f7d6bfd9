//! Analysis job orchestration: the durable status record every poller reads,
//! the runner that executes one pipeline run per accepted launch, and the
//! locator that reconstructs the newest completed result set from disk.
//!
//! One job at a time per output directory is enforced, not assumed: launches
//! race on an atomic gate, and a generation token discards terminal writes
//! from superseded jobs.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs as tokio_fs, sync::Mutex, sync::RwLock, sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

use crate::analysis::{AnalysisPipeline, Method, ProgressEvent, ResultFileGroup};

/// Durable status snapshot, one file per output directory.
pub const STATUS_FILE: &str = "analysis_status.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    Started,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::NotStarted => "not_started",
            JobState::Started => "started",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

/// Full state of one analysis run. Every transition replaces the whole
/// record; there are no partial-field updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<Method>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub total_scholars: usize,
    pub completed_scholars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_scholar_id: Option<String>,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_paths: Option<ResultFileGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl JobStatus {
    /// Synthetic record returned when nothing has ever run.
    pub fn not_started() -> Self {
        Self {
            state: JobState::NotStarted,
            method: None,
            started_at: None,
            ended_at: None,
            total_scholars: 0,
            completed_scholars: 0,
            current_scholar_id: None,
            progress_percent: 0,
            result_paths: None,
            error: None,
            error_detail: None,
        }
    }

    fn started(method: Method, total_scholars: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            state: JobState::Started,
            method: Some(method),
            started_at: Some(started_at),
            total_scholars,
            ..Self::not_started()
        }
    }
}

fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        0
    } else {
        (completed * 100 / total) as u8
    }
}

/// Keeper of the status record: an in-memory copy under a single writer
/// (the runner) plus an on-disk JSON snapshot for external pollers, replaced
/// atomically via write-temp-then-rename.
pub struct JobStatusStore {
    path: PathBuf,
    current: RwLock<Option<JobStatus>>,
}

impl JobStatusStore {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(STATUS_FILE),
            current: RwLock::new(None),
        }
    }

    pub async fn write(&self, status: JobStatus) -> Result<()> {
        {
            let mut guard = self.current.write().await;
            *guard = Some(status.clone());
        }
        self.persist(&status).await
    }

    async fn persist(&self, status: &JobStatus) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let payload =
            serde_json::to_vec_pretty(status).context("failed to encode job status")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio_fs::write(&tmp, &payload)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio_fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Pure read: in-memory record first, then the disk snapshot, then a
    /// synthetic NotStarted. Never errors, never blocks on a job.
    pub async fn load(&self) -> JobStatus {
        if let Some(status) = self.current.read().await.clone() {
            return status;
        }

        match tokio_fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(?err, path = %self.path.display(), "status snapshot is corrupt");
                JobStatus::not_started()
            }),
            Err(_) => JobStatus::not_started(),
        }
    }
}

/// Launch rejections, surfaced synchronously to the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchError {
    EmptyCourses,
    EmptyScholars,
    AlreadyRunning,
    StatusUnavailable,
}

impl LaunchError {
    pub fn message(&self) -> &'static str {
        match self {
            LaunchError::EmptyCourses => "The course list must not be empty.",
            LaunchError::EmptyScholars => "The scholar id list must not be empty.",
            LaunchError::AlreadyRunning => {
                "An analysis is already running; wait for it to finish."
            }
            LaunchError::StatusUnavailable => {
                "Could not record the job status; check the results directory."
            }
        }
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for LaunchError {}

/// Runs one [`AnalysisPipeline`] invocation per accepted launch as a
/// detached background task and keeps the [`JobStatusStore`] current at
/// every transition. Exactly one terminal write happens per job.
pub struct AnalysisJobRunner {
    pipeline: AnalysisPipeline,
    store: JobStatusStore,
    output_dir: PathBuf,
    active: AtomicBool,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AnalysisJobRunner {
    pub fn new(pipeline: AnalysisPipeline, output_dir: PathBuf) -> Self {
        Self {
            pipeline,
            store: JobStatusStore::new(&output_dir),
            output_dir,
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Validates inputs, claims the single-job gate, records the Started
    /// status synchronously, then spawns the background execution and
    /// returns without waiting for it.
    pub async fn launch(
        self: &Arc<Self>,
        courses: Vec<String>,
        scholar_ids: Vec<String>,
        method: Method,
    ) -> Result<(), LaunchError> {
        if courses.is_empty() {
            return Err(LaunchError::EmptyCourses);
        }
        if scholar_ids.is_empty() {
            return Err(LaunchError::EmptyScholars);
        }

        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LaunchError::AlreadyRunning);
        }

        let token = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let started_at = Utc::now();

        if let Err(err) = self
            .store
            .write(JobStatus::started(method, scholar_ids.len(), started_at))
            .await
        {
            error!(?err, "failed to record job start");
            self.active.store(false, Ordering::Release);
            return Err(LaunchError::StatusUnavailable);
        }

        info!(%method, scholars = scholar_ids.len(), token, "analysis job accepted");

        let runner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            runner
                .execute(token, started_at, courses, scholar_ids, method)
                .await;
        });
        *self.task.lock().await = Some(handle);

        Ok(())
    }

    /// Pure read of the current status; NotStarted when nothing ever ran.
    pub async fn poll(&self) -> JobStatus {
        self.store.load().await
    }

    /// Waits for the background task of the most recent launch, if any, to
    /// finish. Used by the foreground CLI; the web surface only polls.
    pub async fn join_active(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(?err, "analysis task panicked");
            }
        }
    }

    async fn execute(
        self: Arc<Self>,
        token: u64,
        started_at: DateTime<Utc>,
        courses: Vec<String>,
        scholar_ids: Vec<String>,
        method: Method,
    ) {
        let total = scholar_ids.len();

        let running = JobStatus {
            state: JobState::Running,
            ..JobStatus::started(method, total, started_at)
        };
        if let Err(err) = self.store.write(running).await {
            warn!(?err, "failed to record running status");
        }

        // Progress events are drained by a dedicated task so the pipeline's
        // observer stays a plain non-blocking send.
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let progress_store: Arc<Self> = Arc::clone(&self);
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let completed = event.index + 1;
                let status = JobStatus {
                    state: JobState::Running,
                    completed_scholars: completed,
                    current_scholar_id: Some(event.scholar_id),
                    progress_percent: progress_percent(completed, total),
                    ..JobStatus::started(method, total, started_at)
                };
                if let Err(err) = progress_store.store.write(status).await {
                    warn!(?err, "failed to persist progress update");
                }
            }
        });

        let result = self
            .pipeline
            .run(&courses, &scholar_ids, method, &self.output_dir, Some(tx))
            .await;

        // The pipeline dropped its sender; wait for queued progress writes
        // so the terminal record is the last one to land.
        if let Err(err) = drain.await {
            warn!(?err, "progress drain task panicked");
        }

        if self.generation.load(Ordering::Acquire) != token {
            warn!(token, "discarding terminal write from a superseded job");
            self.active.store(false, Ordering::Release);
            return;
        }

        let terminal = match result {
            Ok((table, result_paths)) => {
                info!(rows = table.rows.len(), ?result_paths, "analysis job completed");
                JobStatus {
                    state: JobState::Completed,
                    ended_at: Some(Utc::now()),
                    completed_scholars: total,
                    progress_percent: 100,
                    result_paths: Some(result_paths),
                    ..JobStatus::started(method, total, started_at)
                }
            }
            Err(err) => {
                error!(?err, "analysis job failed");
                JobStatus {
                    state: JobState::Failed,
                    ended_at: Some(Utc::now()),
                    error: Some(err.to_string()),
                    error_detail: Some(format!("{err:#}")),
                    ..JobStatus::started(method, total, started_at)
                }
            }
        };

        if let Err(err) = self.store.write(terminal).await {
            error!(?err, "failed to record terminal job status");
        }

        self.active.store(false, Ordering::Release);
    }
}

/// The newest completed result set found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestResult {
    pub method_label: String,
    pub files: ResultFileGroup,
}

/// Scans the output directory for the most recently modified heatmap PNG and
/// reconstructs its file group. Ties on modification time break by filename
/// so repeated scans agree. Returns `None` when no image exists.
pub fn find_latest(output_dir: &Path) -> Result<Option<LatestResult>> {
    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(None),
    };

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.context("failed to read output directory entry")?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".png") {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .with_context(|| format!("failed to stat {name}"))?;
        images.push((modified, name));
    }

    let Some((_, latest)) = images.into_iter().max() else {
        return Ok(None);
    };

    let method_label = if latest.contains("_sum_") {
        "sum"
    } else if latest.contains("_mean_") {
        "mean"
    } else if latest.contains("_max_") {
        "max"
    } else {
        "unknown"
    }
    .to_string();

    let base = latest
        .strip_suffix("_heatmap.png")
        .unwrap_or_else(|| latest.strip_suffix(".png").unwrap_or(&latest))
        .to_string();

    let probe = |name: String| output_dir.join(&name).is_file().then_some(name);
    let files = ResultFileGroup {
        csv: probe(format!("{base}.csv")),
        pdf: probe(format!("{base}_heatmap.pdf")),
        png: Some(latest),
    };

    Ok(Some(LatestResult {
        method_label,
        files,
    }))
}
