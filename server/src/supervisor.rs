use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::recorder::{CapturePipeline, RunOutcome, RunProgress};
use crate::source::redact_url;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("a detection run is already active for {0}")]
    AlreadyRunning(String),
    #[error("shutting down, no new runs accepted")]
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRunInfo {
    pub id: u64,
    pub source: String,
    pub started_at: String,
    #[serde(flatten)]
    pub progress: RunProgress,
}

struct ActiveRun {
    id: u64,
    source: String,
    started_at: String,
    progress: watch::Receiver<RunProgress>,
    abort: AbortHandle,
}

/// Owns every background run: admits at most one per source, reaps finished
/// tasks, and cancels them on request or shutdown.
#[derive(Clone)]
pub struct RunSupervisor {
    pipeline: Arc<CapturePipeline>,
    runs: Arc<Mutex<HashMap<String, ActiveRun>>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    reaped: Arc<Notify>,
}

impl RunSupervisor {
    pub fn new(pipeline: Arc<CapturePipeline>) -> Self {
        Self {
            pipeline,
            runs: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(AtomicBool::new(false)),
            reaped: Arc::new(Notify::new()),
        }
    }

    /// Start a run against `url` in the background and return its id.
    pub fn trigger(&self, url: &str) -> Result<u64, AdmissionError> {
        let key = url.trim().to_string();
        let source = redact_url(&key);

        let mut runs = lock(&self.runs);
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdmissionError::ShuttingDown);
        }
        if runs.contains_key(&key) {
            return Err(AdmissionError::AlreadyRunning(source));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (progress_tx, progress_rx) =
            watch::channel(RunProgress::probing(self.pipeline.target_frame_count()));
        let pipeline = Arc::clone(&self.pipeline);
        let task_url = key.clone();
        let handle = tokio::spawn(async move { pipeline.run(&task_url, &progress_tx).await });

        runs.insert(
            key.clone(),
            ActiveRun {
                id,
                source: source.clone(),
                started_at: chrono::Utc::now().to_rfc3339(),
                progress: progress_rx,
                abort: handle.abort_handle(),
            },
        );
        drop(runs);
        info!(run = id, source, "detection run started");

        let runs = Arc::clone(&self.runs);
        let reaped = Arc::clone(&self.reaped);
        tokio::spawn(async move {
            match handle.await {
                Ok(outcome) => log_outcome(id, &source, &outcome),
                Err(e) if e.is_cancelled() => info!(run = id, source, "detection run cancelled"),
                Err(e) => error!(run = id, source, error = %e, "detection run panicked"),
            }
            {
                let mut runs = lock(&runs);
                if runs.get(&key).is_some_and(|run| run.id == id) {
                    runs.remove(&key);
                }
            }
            reaped.notify_waiters();
        });

        Ok(id)
    }

    pub fn active(&self) -> Vec<ActiveRunInfo> {
        let mut active: Vec<ActiveRunInfo> = lock(&self.runs)
            .values()
            .map(|run| ActiveRunInfo {
                id: run.id,
                source: run.source.clone(),
                started_at: run.started_at.clone(),
                progress: run.progress.borrow().clone(),
            })
            .collect();
        active.sort_by_key(|run| run.id);
        active
    }

    /// Abort the run active for `url`, if any.
    pub fn cancel(&self, url: &str) -> bool {
        let runs = lock(&self.runs);
        match runs.get(url.trim()) {
            Some(run) => {
                info!(run = run.id, source = run.source, "cancelling detection run");
                run.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Wait until every active run has ended and been reaped.
    pub async fn idle(&self) {
        loop {
            let reaped = self.reaped.notified();
            let empty = lock(&self.runs).is_empty();
            if empty {
                return;
            }
            reaped.await;
        }
    }

    /// Refuse new runs, abort the active ones and wait until all are reaped.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        {
            let runs = lock(&self.runs);
            if !runs.is_empty() {
                info!(active = runs.len(), "aborting detection runs");
            }
            for run in runs.values() {
                run.abort.abort();
            }
        }
        self.idle().await;
        info!("all detection runs stopped");
    }
}

fn lock(runs: &Mutex<HashMap<String, ActiveRun>>) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
    runs.lock().unwrap_or_else(|e| e.into_inner())
}

fn log_outcome(id: u64, source: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Done(summary) => info!(
            run = id,
            source,
            run_id = summary.run_id,
            video = summary.video_path.display().to_string(),
            frames = summary.frames_extracted,
            "DONE: detection run complete"
        ),
        RunOutcome::NoPerson => info!(run = id, source, "NO_PERSON: nothing to record"),
        RunOutcome::Failed(e) => warn!(run = id, source, error = %e, "FAILED: detection run aborted"),
    }
}
