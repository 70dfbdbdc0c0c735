use crate::types::{OutputMode, SessionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Starting,
    Listening,
    Transcribing,
    Cleaning,
    Inserting,
    Saving,
    Done,
    Error,
    Cancelled,
}

impl Default for Stage {
    fn default() -> Self {
        Self::Idle
    }
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Starting => "starting",
            Stage::Listening => "listening",
            Stage::Transcribing => "transcribing",
            Stage::Cleaning => "cleaning",
            Stage::Inserting => "inserting",
            Stage::Saving => "saving",
            Stage::Done => "done",
            Stage::Error => "error",
            Stage::Cancelled => "cancelled",
        }
    }

    /// Default overall-progress anchor for this stage.
    ///
    /// Anchors are placeholders chosen to be monotonically increasing along the
    /// happy path; callers override `stage_progress` with live measurements.
    pub fn overall_anchor(self) -> f32 {
        match self {
            Stage::Idle => 0.0,
            Stage::Starting => 0.05,
            Stage::Listening => 0.10,
            Stage::Transcribing => 0.45,
            Stage::Cleaning => 0.70,
            Stage::Inserting => 0.85,
            Stage::Saving => 0.93,
            Stage::Done => 1.0,
            // Terminal failure states freeze wherever progress was.
            Stage::Error | Stage::Cancelled => 0.0,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Error | Stage::Cancelled)
    }
}

/// Single mutable record broadcast to progress observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    pub stage: Stage,
    pub stage_label: String,
    /// Per-stage progress; None = indeterminate.
    pub stage_progress: Option<f32>,
    /// 0..1, monotonic across the happy path.
    pub overall_progress: f32,
    pub elapsed_ms: Option<u64>,
    pub recorded_ms: Option<u64>,
    pub generated_chars: Option<u64>,
    pub generated_words: Option<u64>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub message: Option<String>,
    pub output_mode: Option<OutputMode>,
    pub session_id: Option<SessionId>,
    pub job_id: Option<u64>,
}

impl StageProgress {
    pub fn idle() -> Self {
        Self {
            stage: Stage::Idle,
            stage_label: Stage::Idle.label().into(),
            stage_progress: None,
            overall_progress: 0.0,
            elapsed_ms: None,
            recorded_ms: None,
            generated_chars: None,
            generated_words: None,
            provider: None,
            model: None,
            message: None,
            output_mode: None,
            session_id: None,
            job_id: None,
        }
    }

    /// Advances this record to `stage`, keeping overall progress monotonic.
    ///
    /// Error/Cancelled freeze the overall value so the UI doesn't rewind a
    /// progress bar just before showing a failure.
    pub fn advance(&mut self, stage: Stage) {
        let anchor = stage.overall_anchor();
        self.overall_progress = if stage.is_terminal() && stage != Stage::Done {
            self.overall_progress
        } else {
            self.overall_progress.max(anchor)
        };
        self.stage = stage;
        self.stage_label = stage.label().into();
        self.stage_progress = None;
        if stage == Stage::Idle {
            *self = Self::idle();
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Default for StageProgress {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_are_monotonic_along_happy_path() {
        let path = [
            Stage::Starting,
            Stage::Listening,
            Stage::Transcribing,
            Stage::Cleaning,
            Stage::Inserting,
            Stage::Saving,
            Stage::Done,
        ];
        let mut prev = 0.0;
        for stage in path {
            assert!(stage.overall_anchor() > prev, "{stage:?}");
            prev = stage.overall_anchor();
        }
    }

    #[test]
    fn advance_never_moves_overall_progress_backwards() {
        let mut p = StageProgress::idle();
        p.advance(Stage::Transcribing);
        assert_eq!(p.overall_progress, 0.45);

        // A caller pushing a stage with a lower anchor must not rewind.
        p.advance(Stage::Listening);
        assert_eq!(p.overall_progress, 0.45);
    }

    #[test]
    fn error_freezes_overall_progress() {
        let mut p = StageProgress::idle();
        p.advance(Stage::Cleaning);
        p.advance(Stage::Error);
        assert_eq!(p.overall_progress, 0.70);
        assert_eq!(p.stage_label, "error");
    }

    #[test]
    fn advancing_to_idle_resets_the_record() {
        let mut p = StageProgress::idle();
        p.advance(Stage::Done);
        p.session_id = Some(SessionId::new("s1"));
        p.advance(Stage::Idle);
        assert_eq!(p, StageProgress::idle());
    }

    #[test]
    fn terminal_stages() {
        assert!(Stage::Done.is_terminal());
        assert!(Stage::Error.is_terminal());
        assert!(Stage::Cancelled.is_terminal());
        assert!(!Stage::Saving.is_terminal());
    }
}
