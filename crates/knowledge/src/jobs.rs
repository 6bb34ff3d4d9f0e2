//! Processing-job tracking for the ingestion pipeline.
//!
//! Jobs are polled, never pushed. Every job carries a cancellation token
//! that the pipeline checks before writing anywhere; deleting a document
//! cancels the token and moves the job to `cancelled`. A job that has not
//! advanced within the stall timeout is reported as `error` on the next
//! poll, whether or not its worker is still running.

use crate::types::{ErrorInfo, JobStatus};
use chrono::{DateTime, Utc};
use ragbridge_core::{AppError, AppResult, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Pipeline step a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Storing,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Mirroring,
    Done,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::Storing => "storing",
            JobStage::Extracting => "extracting",
            JobStage::Chunking => "chunking",
            JobStage::Embedding => "embedding",
            JobStage::Indexing => "indexing",
            JobStage::Mirroring => "mirroring",
            JobStage::Done => "done",
        }
    }
}

/// One upload's progress through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub job_id: String,
    pub file_id: String,
    pub status: JobStatus,
    /// 0-100, never decreases; 100 only when completed
    pub progress: u8,
    pub stage: JobStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub chunks_total: usize,
    pub chunks_embedded: usize,
    pub chunks_indexed: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    fn new(job_id: String, file_id: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            file_id,
            status: JobStatus::Pending,
            progress: 0,
            stage: JobStage::Queued,
            error: None,
            chunks_total: 0,
            chunks_embedded: 0,
            chunks_indexed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Format as a simple user-facing line.
    pub fn format_simple(&self) -> String {
        let mut line = format!(
            "[{}] {:>3}% {} ({}/{} embedded, {}/{} indexed)",
            self.status,
            self.progress,
            self.stage.as_str(),
            self.chunks_embedded,
            self.chunks_total,
            self.chunks_indexed,
            self.chunks_total
        );
        if let Some(error) = &self.error {
            line.push_str(&format!(" - {}", error.message));
        }
        line
    }
}

#[derive(Debug)]
struct JobEntry {
    job: ProcessingJob,
    cancel: CancellationToken,
    last_progress: Instant,
}

#[derive(Debug, Default)]
struct TrackerState {
    jobs: HashMap<String, JobEntry>,
    /// file_id -> job_id of its non-terminal job
    active_by_file: HashMap<String, String>,
}

impl TrackerState {
    fn entry_mut(&mut self, job_id: &str) -> AppResult<&mut JobEntry> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {}", job_id)))
    }

    fn finish(&mut self, job_id: &str) {
        if let Some(entry) = self.jobs.get(job_id) {
            let file_id = entry.job.file_id.clone();
            if self.active_by_file.get(&file_id).map(String::as_str) == Some(job_id) {
                self.active_by_file.remove(&file_id);
            }
        }
    }
}

/// Owns every job and enforces one active job per document.
#[derive(Debug)]
pub struct JobTracker {
    state: Mutex<TrackerState>,
    stall_timeout: Duration,
}

fn inactive(job: &ProcessingJob) -> AppError {
    AppError::Cancelled(format!(
        "Job {} for file {} is no longer active ({})",
        job.job_id, job.file_id, job.status
    ))
}

impl JobTracker {
    pub fn new(stall_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            stall_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new job. Fails with `Conflict` while the document already
    /// has a job in flight.
    pub fn create(&self, file_id: &str) -> AppResult<(ProcessingJob, CancellationToken)> {
        let mut state = self.lock();

        if let Some(existing) = state.active_by_file.get(file_id) {
            return Err(AppError::Conflict(format!(
                "File {} is already being processed by job {}",
                file_id, existing
            )));
        }

        let job = ProcessingJob::new(uuid::Uuid::new_v4().to_string(), file_id.to_string());
        let cancel = CancellationToken::new();

        state
            .active_by_file
            .insert(file_id.to_string(), job.job_id.clone());
        state.jobs.insert(
            job.job_id.clone(),
            JobEntry {
                job: job.clone(),
                cancel: cancel.clone(),
                last_progress: Instant::now(),
            },
        );

        tracing::info!(job_id = %job.job_id, file_id, "Created processing job");
        Ok((job, cancel))
    }

    /// Move a running job to `uploading` or `processing`.
    pub fn set_status(&self, job_id: &str, status: JobStatus, stage: JobStage) -> AppResult<()> {
        let mut state = self.lock();
        let entry = state.entry_mut(job_id)?;
        if entry.job.status.is_terminal() {
            return Err(inactive(&entry.job));
        }

        entry.job.status = status;
        entry.job.stage = stage;
        entry.job.updated_at = Utc::now();
        entry.last_progress = Instant::now();

        tracing::debug!(job_id, status = %status, stage = stage.as_str(), "Job status changed");
        Ok(())
    }

    /// Raise progress (capped at 99) and apply count updates.
    ///
    /// Progress never decreases. Fails with `Cancelled` once the job is
    /// terminal so the worker stops.
    pub fn advance_with<F>(&self, job_id: &str, progress: u8, stage: JobStage, update: F) -> AppResult<()>
    where
        F: FnOnce(&mut ProcessingJob),
    {
        let mut state = self.lock();
        let entry = state.entry_mut(job_id)?;
        if entry.job.status.is_terminal() {
            return Err(inactive(&entry.job));
        }

        update(&mut entry.job);
        entry.job.progress = entry.job.progress.max(progress.min(99));
        entry.job.stage = stage;
        entry.job.updated_at = Utc::now();
        entry.last_progress = Instant::now();

        tracing::debug!(
            job_id,
            file_id = %entry.job.file_id,
            progress = entry.job.progress,
            stage = stage.as_str(),
            "Job progress"
        );
        Ok(())
    }

    pub fn advance(&self, job_id: &str, progress: u8, stage: JobStage) -> AppResult<()> {
        self.advance_with(job_id, progress, stage, |_| {})
    }

    /// Mark the job completed. Fails with `Cancelled` if it was cancelled
    /// or timed out first.
    pub fn complete(&self, job_id: &str) -> AppResult<ProcessingJob> {
        let mut state = self.lock();
        let entry = state.entry_mut(job_id)?;
        if entry.job.status.is_terminal() || entry.cancel.is_cancelled() {
            return Err(inactive(&entry.job));
        }

        entry.job.status = JobStatus::Completed;
        entry.job.stage = JobStage::Done;
        entry.job.progress = 100;
        entry.job.updated_at = Utc::now();
        let job = entry.job.clone();
        state.finish(job_id);

        tracing::info!(job_id, file_id = %job.file_id, chunks = job.chunks_total, "Job completed");
        Ok(job)
    }

    /// Mark the job failed. A job that is already terminal is left alone.
    pub fn fail(&self, job_id: &str, err: &AppError) {
        let mut state = self.lock();
        let Ok(entry) = state.entry_mut(job_id) else {
            return;
        };
        if entry.job.status.is_terminal() {
            return;
        }

        entry.job.status = JobStatus::Error;
        entry.job.error = Some(ErrorInfo::from(err));
        entry.job.updated_at = Utc::now();
        entry.cancel.cancel();
        state.finish(job_id);

        tracing::error!(job_id, kind = %err.kind(), error = %err, "Job failed");
    }

    /// Cancel the active job of a document, if any.
    pub fn cancel_file(&self, file_id: &str) -> Option<ProcessingJob> {
        let mut state = self.lock();
        let job_id = state.active_by_file.get(file_id)?.clone();
        let entry = state.jobs.get_mut(&job_id)?;

        entry.cancel.cancel();
        entry.job.status = JobStatus::Cancelled;
        entry.job.error = Some(ErrorInfo {
            kind: ErrorKind::Cancelled,
            message: format!("Document {} was deleted during processing", file_id),
        });
        entry.job.updated_at = Utc::now();
        let job = entry.job.clone();
        state.finish(&job_id);

        tracing::info!(job_id = %job_id, file_id, progress = job.progress, "Job cancelled");
        Some(job)
    }

    /// Current state of a job, applying the stall timeout.
    pub fn get(&self, job_id: &str) -> AppResult<ProcessingJob> {
        self.poll(job_id).map(|(job, _)| job)
    }

    /// Like [`JobTracker::get`], also reporting whether this poll is the one
    /// that declared the job stalled.
    pub fn poll(&self, job_id: &str) -> AppResult<(ProcessingJob, bool)> {
        let mut state = self.lock();
        let stall_timeout = self.stall_timeout;
        let entry = state.entry_mut(job_id)?;

        // Queued jobs have no worker yet; the clock starts when one picks them up.
        let running = !entry.job.status.is_terminal() && entry.job.status != JobStatus::Pending;
        if running && entry.last_progress.elapsed() > stall_timeout {
            entry.cancel.cancel();
            entry.job.status = JobStatus::Error;
            entry.job.error = Some(ErrorInfo {
                kind: ErrorKind::TransientBackend,
                message: format!(
                    "Timed out: no progress for {}s during {}",
                    stall_timeout.as_secs_f64(),
                    entry.job.stage.as_str()
                ),
            });
            entry.job.updated_at = Utc::now();
            tracing::warn!(job_id, file_id = %entry.job.file_id, "Job stalled");
            let job = entry.job.clone();
            state.finish(job_id);
            return Ok((job, true));
        }

        Ok((entry.job.clone(), false))
    }

    pub fn active_job_for(&self, file_id: &str) -> Option<String> {
        self.lock().active_by_file.get(file_id).cloned()
    }

    pub fn counts_by_status(&self) -> HashMap<JobStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.lock().jobs.values() {
            *counts.entry(entry.job.status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> JobTracker {
        JobTracker::new(Duration::from_secs(300))
    }

    #[test]
    fn test_one_active_job_per_file() {
        let jobs = tracker();
        let (first, _) = jobs.create("doc").unwrap();

        let err = jobs.create("doc").unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        jobs.complete(&first.job_id).unwrap();
        assert!(jobs.create("doc").is_ok());
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let jobs = tracker();
        let (job, _) = jobs.create("doc").unwrap();

        jobs.advance(&job.job_id, 40, JobStage::Embedding).unwrap();
        jobs.advance(&job.job_id, 20, JobStage::Embedding).unwrap();
        assert_eq!(jobs.get(&job.job_id).unwrap().progress, 40);

        jobs.advance(&job.job_id, 100, JobStage::Mirroring).unwrap();
        assert_eq!(jobs.get(&job.job_id).unwrap().progress, 99);

        let done = jobs.complete(&job.job_id).unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let jobs = tracker();
        let (job, _) = jobs.create("doc").unwrap();
        jobs.fail(&job.job_id, &AppError::RateLimited("exhausted".into()));

        assert!(jobs.advance(&job.job_id, 50, JobStage::Embedding).is_err());
        assert!(jobs.complete(&job.job_id).is_err());
        jobs.fail(&job.job_id, &AppError::Other("later".into()));

        let (status, stalled_now) = jobs.poll(&job.job_id).unwrap();
        assert!(!stalled_now);
        assert_eq!(status.status, JobStatus::Error);
        assert!(status.error.unwrap().message.contains("exhausted"));
    }

    #[test]
    fn test_cancel_file() {
        let jobs = tracker();
        let (job, token) = jobs.create("doc").unwrap();
        jobs.advance(&job.job_id, 30, JobStage::Embedding).unwrap();

        let cancelled = jobs.cancel_file("doc").unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(token.is_cancelled());
        assert!(jobs.complete(&job.job_id).is_err());
        assert!(jobs.cancel_file("doc").is_none());
        assert_eq!(jobs.get(&job.job_id).unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_stalled_job_reported_as_error() {
        let jobs = JobTracker::new(Duration::from_millis(20));
        let (job, token) = jobs.create("doc").unwrap();
        jobs.set_status(&job.job_id, JobStatus::Processing, JobStage::Embedding)
            .unwrap();

        std::thread::sleep(Duration::from_millis(40));

        let (status, stalled_now) = jobs.poll(&job.job_id).unwrap();
        assert!(!stalled_now);
        assert_eq!(status.status, JobStatus::Error);
        let error = status.error.unwrap();
        assert_eq!(error.kind, ErrorKind::TransientBackend);
        assert!(error.message.contains("Timed out"));
        assert!(token.is_cancelled());
        assert!(jobs.active_job_for("doc").is_none());
        assert!(!jobs.poll(&job.job_id).unwrap().1);
    }

    #[test]
    fn test_queued_job_does_not_stall() {
        let jobs = JobTracker::new(Duration::from_millis(10));
        let (job, _) = jobs.create("doc").unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(jobs.get(&job.job_id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_unknown_job_not_found() {
        assert!(matches!(tracker().get("nope"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_format_simple() {
        let jobs = tracker();
        let (job, _) = jobs.create("doc").unwrap();
        jobs.advance_with(&job.job_id, 45, JobStage::Embedding, |j| {
            j.chunks_total = 4;
            j.chunks_embedded = 2;
        })
        .unwrap();

        let line = jobs.get(&job.job_id).unwrap().format_simple();
        assert!(line.contains("45%"));
        assert!(line.contains("2/4 embedded"));
    }
}
