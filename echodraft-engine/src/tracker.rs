use crate::session::{JobStatus, ProcessingJob, epoch_ms};
use echodraft_core::types::{OutputMode, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const JOB_REMOVAL_GRACE: Duration = Duration::from_secs(2);

struct TrackedJob {
    job: ProcessingJob,
    /// Bumped on every mutation; a pending removal only fires if the
    /// generation it captured is still current.
    generation: u64,
}

struct TrackerInner {
    next_job_id: u64,
    jobs: HashMap<SessionId, TrackedJob>,
}

/// Session-to-job map behind the UI's job list. Jobs linger for a short grace
/// period after reaching a terminal status so observers can render the final
/// state before the entry disappears.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<Mutex<TrackerInner>>,
    removal_grace: Duration,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::with_removal_grace(JOB_REMOVAL_GRACE)
    }

    pub fn with_removal_grace(removal_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner {
                next_job_id: 1,
                jobs: HashMap::new(),
            })),
            removal_grace,
        }
    }

    pub fn begin_job(
        &self,
        session_id: &SessionId,
        output_mode: OutputMode,
        provider: &str,
        model: &str,
    ) -> u64 {
        let mut inner = self.lock();
        let job_id = inner.next_job_id;
        inner.next_job_id += 1;
        inner.jobs.insert(
            session_id.clone(),
            TrackedJob {
                job: ProcessingJob {
                    job_id,
                    session_id: session_id.clone(),
                    status: JobStatus::Recording,
                    output_mode,
                    provider: provider.to_string(),
                    model: model.to_string(),
                    recorded_ms: None,
                    started_at: Some(epoch_ms()),
                    stopped_at: None,
                },
                generation: 0,
            },
        );
        job_id
    }

    pub fn set_status(&self, session_id: &SessionId, status: JobStatus) {
        let generation = {
            let mut inner = self.lock();
            let Some(tracked) = inner.jobs.get_mut(session_id) else {
                return;
            };
            tracked.job.status = status;
            if status.is_terminal() {
                tracked.job.stopped_at = Some(epoch_ms());
            }
            tracked.generation += 1;
            tracked.generation
        };

        if status.is_terminal() {
            self.schedule_removal(session_id.clone(), generation);
        }
    }

    pub fn set_recorded_ms(&self, session_id: &SessionId, recorded_ms: u64) {
        let mut inner = self.lock();
        if let Some(tracked) = inner.jobs.get_mut(session_id) {
            tracked.job.recorded_ms = Some(recorded_ms);
            tracked.generation += 1;
        }
    }

    fn schedule_removal(&self, session_id: SessionId, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let grace = self.removal_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Ok(mut inner) = inner.lock() {
                let stale = inner
                    .jobs
                    .get(&session_id)
                    .is_some_and(|t| t.generation == generation && t.job.status.is_terminal());
                if stale {
                    inner.jobs.remove(&session_id);
                }
            }
        });
    }

    pub fn get(&self, session_id: &SessionId) -> Option<ProcessingJob> {
        self.lock().jobs.get(session_id).map(|t| t.job.clone())
    }

    pub fn snapshot(&self) -> Vec<ProcessingJob> {
        let mut jobs: Vec<ProcessingJob> =
            self.lock().jobs.values().map(|t| t.job.clone()).collect();
        jobs.sort_by_key(|j| j.job_id);
        jobs
    }

    /// Whether any insert-mode job is still short of a terminal status.
    /// Clipboard-mode jobs never block a new recording.
    pub fn insert_mode_processing(&self) -> bool {
        self.lock().jobs.values().any(|t| {
            t.job.output_mode == OutputMode::Insert && !t.job.status.is_terminal()
        })
    }

    pub fn has_active_jobs(&self) -> bool {
        self.lock().jobs.values().any(|t| !t.job.status.is_terminal())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        // The mutex only guards plain map updates; poisoning would mean a
        // panic mid-update, which we treat as fatal anyway.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::new(s)
    }

    #[test]
    fn job_ids_are_monotonic() {
        let tracker = JobTracker::new();
        let a = tracker.begin_job(&sid("a"), OutputMode::Insert, "local-whisper", "m");
        let b = tracker.begin_job(&sid("b"), OutputMode::Insert, "local-whisper", "m");
        assert!(b > a);
    }

    #[test]
    fn insert_mode_processing_ignores_clipboard_jobs() {
        let tracker = JobTracker::new();
        tracker.begin_job(&sid("a"), OutputMode::Clipboard, "openai", "whisper-1");
        assert!(!tracker.insert_mode_processing());
        assert!(tracker.has_active_jobs());

        tracker.begin_job(&sid("b"), OutputMode::Insert, "openai", "whisper-1");
        assert!(tracker.insert_mode_processing());
    }

    #[test]
    fn queued_jobs_still_block_like_processing_ones() {
        // Stop accepted, pipeline not yet transcribing.
        let tracker = JobTracker::new();
        tracker.begin_job(&sid("a"), OutputMode::Insert, "openai", "whisper-1");
        tracker.set_status(&sid("a"), JobStatus::Queued);

        assert_eq!(
            tracker.get(&sid("a")).map(|j| j.status),
            Some(JobStatus::Queued)
        );
        assert!(tracker.insert_mode_processing());
        assert!(tracker.has_active_jobs());
    }

    #[tokio::test]
    async fn terminal_jobs_are_removed_after_the_grace_period() {
        let tracker = JobTracker::with_removal_grace(Duration::from_millis(30));
        tracker.begin_job(&sid("a"), OutputMode::Insert, "openai", "whisper-1");
        tracker.set_status(&sid("a"), JobStatus::Done);

        assert!(tracker.get(&sid("a")).is_some());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(tracker.get(&sid("a")).is_none());
    }

    #[tokio::test]
    async fn later_update_cancels_a_pending_removal() {
        let tracker = JobTracker::with_removal_grace(Duration::from_millis(30));
        tracker.begin_job(&sid("a"), OutputMode::Insert, "openai", "whisper-1");
        tracker.set_status(&sid("a"), JobStatus::Error);
        // Re-enter a non-terminal state before the grace expires.
        tracker.set_status(&sid("a"), JobStatus::Processing);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            tracker.get(&sid("a")).map(|j| j.status),
            Some(JobStatus::Processing)
        );
    }

    #[tokio::test]
    async fn repeated_terminal_updates_are_idempotent() {
        let tracker = JobTracker::with_removal_grace(Duration::from_millis(30));
        tracker.begin_job(&sid("a"), OutputMode::Clipboard, "openai", "whisper-1");
        tracker.set_status(&sid("a"), JobStatus::Done);
        tracker.set_status(&sid("a"), JobStatus::Done);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(tracker.get(&sid("a")).is_none());
    }

    #[test]
    fn snapshot_is_sorted_by_job_id() {
        let tracker = JobTracker::new();
        tracker.begin_job(&sid("a"), OutputMode::Insert, "p", "m");
        tracker.begin_job(&sid("b"), OutputMode::Insert, "p", "m");
        tracker.begin_job(&sid("c"), OutputMode::Insert, "p", "m");
        let snapshot = tracker.snapshot();
        let ids: Vec<u64> = snapshot.iter().map(|j| j.job_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
