use echodraft_core::stage::{Stage, StageProgress};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

pub const STAGE_IDLE_RESET_GRACE: Duration = Duration::from_secs(3);

/// Broadcasts the single shared `StageProgress` record to observers.
///
/// Only the foreground session writes here; background (clipboard-mode)
/// sessions keep to the job tracker so they can't stomp on what the user is
/// watching. Terminal stages auto-revert to idle after a grace window unless
/// something newer arrives first.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    tx: Arc<watch::Sender<StageProgress>>,
    generation: Arc<AtomicU64>,
    reset_grace: Duration,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::with_reset_grace(STAGE_IDLE_RESET_GRACE)
    }

    pub fn with_reset_grace(reset_grace: Duration) -> Self {
        let (tx, _rx) = watch::channel(StageProgress::idle());
        Self {
            tx: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            reset_grace,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StageProgress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> StageProgress {
        self.tx.borrow().clone()
    }

    /// Publishes a record. Any publish re-arms (clears) a pending idle reset.
    pub fn publish(&self, record: StageProgress) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        // send_replace updates the value even while no receiver is attached.
        self.tx.send_replace(record);
    }

    /// Publishes only when `foreground` holds; background sessions are
    /// tracked in the job map instead.
    pub fn publish_if_foreground(&self, record: StageProgress, foreground: bool) {
        if foreground {
            self.publish(record);
        }
    }

    /// Arms the idle auto-reset after a terminal stage. `still_active` is
    /// probed when the grace expires; an active session or job vetoes the
    /// reset. Arming again, or publishing anything, cancels a pending reset.
    pub fn arm_idle_reset<F>(&self, still_active: F)
    where
        F: Fn() -> bool + Send + 'static,
    {
        let armed_at = self.generation.load(Ordering::SeqCst);
        let tx = Arc::clone(&self.tx);
        let generation = Arc::clone(&self.generation);
        let grace = self.reset_grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if generation.load(Ordering::SeqCst) != armed_at {
                return;
            }
            if !tx.borrow().stage.is_terminal() {
                return;
            }
            if still_active() {
                return;
            }
            tx.send_replace(StageProgress::idle());
        });
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(stage: Stage) -> StageProgress {
        let mut p = StageProgress::idle();
        p.advance(stage);
        p
    }

    #[tokio::test]
    async fn terminal_stage_reverts_to_idle_after_grace() {
        let b = ProgressBroadcaster::with_reset_grace(Duration::from_millis(30));
        b.publish(at(Stage::Done));
        b.arm_idle_reset(|| false);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(b.current().stage, Stage::Idle);
    }

    #[tokio::test]
    async fn a_newer_publish_cancels_the_reset() {
        let b = ProgressBroadcaster::with_reset_grace(Duration::from_millis(30));
        b.publish(at(Stage::Done));
        b.arm_idle_reset(|| false);
        // A new session starts before the grace expires.
        b.publish(at(Stage::Starting));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(b.current().stage, Stage::Starting);
    }

    #[tokio::test]
    async fn active_jobs_veto_the_reset() {
        let b = ProgressBroadcaster::with_reset_grace(Duration::from_millis(30));
        b.publish(at(Stage::Done));
        b.arm_idle_reset(|| true);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(b.current().stage, Stage::Done);
    }

    #[tokio::test]
    async fn background_sessions_do_not_write() {
        let b = ProgressBroadcaster::new();
        b.publish_if_foreground(at(Stage::Transcribing), false);
        assert_eq!(b.current().stage, Stage::Idle);

        b.publish_if_foreground(at(Stage::Transcribing), true);
        assert_eq!(b.current().stage, Stage::Transcribing);
    }

    #[tokio::test]
    async fn publishes_land_before_any_subscriber_attaches() {
        let b = ProgressBroadcaster::new();
        b.publish(at(Stage::Listening));
        assert_eq!(b.current().stage, Stage::Listening);

        // A late subscriber still sees the latest record.
        let rx = b.subscribe();
        assert_eq!(rx.borrow().stage, Stage::Listening);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let b = ProgressBroadcaster::new();
        let mut rx = b.subscribe();
        b.publish(at(Stage::Listening));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().stage, Stage::Listening);
    }
}
