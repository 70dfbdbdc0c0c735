use crate::delivery::deliver;
use crate::history::HistoryWriter;
use crate::progress::ProgressBroadcaster;
use crate::recording::RecordingController;
use crate::router::ProviderRouter;
use crate::session::{DictationSession, JobStatus, TranscriptionResult, epoch_ms, ms};
use crate::settings::{Settings, SettingsProvider};
use crate::tracker::JobTracker;
use crate::traits::{
    AudioInput, BackendTranscript, CleanupBackend, DictionaryStore, HostActions,
    MicrophoneCapture, StreamingFactory, TranscribeOptions, TranscriptionRecord, RecordMeta,
    TranscriptionStore,
};
use anyhow::anyhow;
use echodraft_core::echo_guard::detect_prompt_echo;
use echodraft_core::error::DictationError;
use echodraft_core::stage::{Stage, StageProgress};
use echodraft_core::transcript::{char_count, reconcile_final_text, word_count};
use echodraft_core::types::{
    OutputMode, PROVIDER_STREAMING, StopSource, reasoned_source_tag,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;

pub struct EngineDeps {
    pub host: Arc<dyn HostActions>,
    pub capture: Arc<dyn MicrophoneCapture>,
    pub router: ProviderRouter,
    pub cleanup: Option<Arc<dyn CleanupBackend>>,
    pub store: Arc<dyn TranscriptionStore>,
    pub dictionary: Arc<dyn DictionaryStore>,
    pub settings: Arc<dyn SettingsProvider>,
    pub streaming: Option<Arc<dyn StreamingFactory>>,
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Override the configured output mode for this session.
    pub output_mode: Option<OutputMode>,
    /// Background sessions never touch the shared progress record.
    pub background: bool,
    /// When the user gesture fired, for hotkey-to-start diagnostics.
    pub triggered_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    pub stop_source: StopSource,
    /// Per-job cleanup override; None defers to the global setting.
    pub cleanup_override: Option<bool>,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            stop_source: StopSource::Manual,
            cleanup_override: None,
        }
    }
}

struct ActiveSession {
    session: DictationSession,
    settings: Settings,
    /// Cleared when a newer foreground session is admitted, so a job still
    /// processing stops writing to the shared progress record.
    foreground: Arc<AtomicBool>,
    streaming: bool,
    pipeline_started: Instant,
}

impl ActiveSession {
    fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }
}

/// The pipeline orchestrator: one dictation recording at a time, stages
/// broadcast as it runs, results delivered and persisted.
pub struct DictationEngine {
    host: Arc<dyn HostActions>,
    router: ProviderRouter,
    cleanup: Option<Arc<dyn CleanupBackend>>,
    dictionary: Arc<dyn DictionaryStore>,
    settings: Arc<dyn SettingsProvider>,
    streaming: Option<Arc<dyn StreamingFactory>>,
    history: HistoryWriter,
    recording: RecordingController,
    tracker: JobTracker,
    progress: ProgressBroadcaster,
    active: Mutex<Option<ActiveSession>>,
    /// Foreground flag of the most recently admitted foreground session.
    foreground_handle: std::sync::Mutex<Option<Arc<AtomicBool>>>,
}

impl DictationEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            host: deps.host,
            router: deps.router,
            cleanup: deps.cleanup,
            dictionary: deps.dictionary,
            settings: deps.settings,
            streaming: deps.streaming,
            history: HistoryWriter::new(deps.store),
            recording: RecordingController::new(deps.capture),
            tracker: JobTracker::new(),
            progress: ProgressBroadcaster::new(),
            active: Mutex::new(None),
            foreground_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn progress(&self) -> &ProgressBroadcaster {
        &self.progress
    }

    pub fn subscribe_progress(&self) -> tokio::sync::watch::Receiver<StageProgress> {
        self.progress.subscribe()
    }

    /// Pre-warms capture (permission-gated) and, for the streaming tier,
    /// pre-authenticates the websocket endpoint.
    pub async fn warm_up(&self) {
        let settings = self.settings.settings();
        self.recording.warm_up(settings.sample_rate_hz).await;

        if settings.provider == PROVIDER_STREAMING {
            if let Some(factory) = &self.streaming {
                if let Err(e) = factory.warmup().await {
                    log::warn!("streaming warm-up failed: {e:#}");
                }
            }
        }
    }

    /// Starts a dictation. Returns false, with no side effects, when the
    /// microphone is held by another session or an insert-mode job is still
    /// processing; clipboard-mode processing never blocks a new start.
    pub async fn start_dictation(&self, opts: StartOptions) -> anyhow::Result<bool> {
        let mut active = self.active.lock().await;
        if active.is_some() || self.recording.is_recording().await {
            return Ok(false);
        }
        if self.tracker.insert_mode_processing() {
            return Ok(false);
        }

        let settings = self.settings.settings();
        let output_mode = opts.output_mode.unwrap_or(settings.output_mode);

        let mut session = DictationSession::new(output_mode);
        session.triggered_at = Some(epoch_ms());

        if output_mode == OutputMode::Insert {
            // Snapshot the destination now; focus will move before delivery.
            session.insertion_target = match self.host.capture_insertion_target().await {
                Ok(target) => target,
                Err(e) => {
                    log::warn!("could not capture insertion target: {e:#}");
                    None
                }
            };
        }

        let foreground = Arc::new(AtomicBool::new(!opts.background));
        if !opts.background {
            // Admitting a new foreground session demotes whatever is still
            // processing; its remaining stage publishes go nowhere.
            let mut handle = self
                .foreground_handle
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(prior) = handle.replace(Arc::clone(&foreground)) {
                prior.store(false, Ordering::SeqCst);
            }
        }

        let mut record = StageProgress::idle();
        record.advance(Stage::Starting);
        self.annotate(&mut record, &session, &settings);
        self.progress
            .publish_if_foreground(record.clone(), foreground.load(Ordering::SeqCst));

        let streaming = settings.provider == PROVIDER_STREAMING;
        let started = match self.begin_capture(&settings, streaming, opts.triggered_at).await {
            Ok(started) => started,
            Err(e) => {
                self.abort_start(record, &foreground, format!("could not start recording: {e:#}"));
                return Err(e);
            }
        };
        if !started {
            self.abort_start(record, &foreground, "audio capture is already in use".into());
            return Ok(false);
        }

        session.started_at = Some(epoch_ms());
        self.tracker.begin_job(
            &session.session_id,
            output_mode,
            &settings.provider,
            &settings.model,
        );

        record.advance(Stage::Listening);
        self.annotate(&mut record, &session, &settings);
        self.progress
            .publish_if_foreground(record, foreground.load(Ordering::SeqCst));

        *active = Some(ActiveSession {
            session,
            settings,
            foreground,
            streaming,
            pipeline_started: Instant::now(),
        });
        Ok(true)
    }

    async fn begin_capture(
        &self,
        settings: &Settings,
        streaming: bool,
        triggered_at: Option<Instant>,
    ) -> anyhow::Result<bool> {
        if streaming {
            let factory = self
                .streaming
                .as_ref()
                .ok_or_else(|| anyhow!("streaming provider selected but not configured"))?;
            let sink = factory.start().await?;
            self.recording
                .start_streaming_recording(settings.sample_rate_hz, sink, triggered_at)
                .await
        } else {
            self.recording
                .start_recording(settings.sample_rate_hz, triggered_at)
                .await
        }
    }

    /// A start that already published Starting must not leave the shared
    /// record stuck there; close it out as a terminal error and arm the
    /// idle reset.
    fn abort_start(&self, mut record: StageProgress, foreground: &Arc<AtomicBool>, message: String) {
        record.advance(Stage::Error);
        record.message = Some(message);
        let is_foreground = foreground.load(Ordering::SeqCst);
        self.progress.publish_if_foreground(record, is_foreground);
        if is_foreground {
            let tracker = self.tracker.clone();
            self.progress.arm_idle_reset(move || tracker.has_active_jobs());
        }
    }

    /// Stops the recording and runs the rest of the pipeline to completion.
    pub async fn stop_dictation(&self, opts: StopOptions) -> anyhow::Result<TranscriptionResult> {
        let mut guard = self.active.lock().await;
        let Some(mut active) = guard.take() else {
            return Err(anyhow!("no dictation in progress"));
        };
        // Release the slot before processing so a clipboard-mode job doesn't
        // block the next recording.
        drop(guard);

        active.session.released_at = Some(epoch_ms());
        active.session.stop_source = Some(opts.stop_source);
        self.tracker
            .set_status(&active.session.session_id, JobStatus::Queued);

        match self.process(&active, opts).await {
            Ok(result) => {
                self.tracker
                    .set_status(&active.session.session_id, JobStatus::Done);
                self.publish_terminal(&active, Stage::Done, None, Some(&result));
                Ok(result)
            }
            Err(e) => {
                self.tracker
                    .set_status(&active.session.session_id, JobStatus::Error);
                self.publish_terminal(&active, Stage::Error, Some(e.to_string()), None);
                Err(e.into())
            }
        }
    }

    /// Abandons the active recording: microphone released, audio discarded,
    /// no provider invoked, nothing persisted.
    pub async fn cancel_dictation(&self) -> bool {
        let mut guard = self.active.lock().await;
        let Some(active) = guard.take() else {
            return false;
        };
        drop(guard);

        self.recording.cancel().await;
        self.tracker
            .set_status(&active.session.session_id, JobStatus::Cancelled);
        self.publish_terminal(&active, Stage::Cancelled, None, None);
        true
    }

    async fn process(
        &self,
        active: &ActiveSession,
        opts: StopOptions,
    ) -> Result<TranscriptionResult, DictationError> {
        let session = &active.session;
        let settings = &active.settings;

        self.tracker
            .set_status(&session.session_id, JobStatus::Processing);
        self.publish_stage(active, Stage::Transcribing);

        let dictionary = match self.dictionary.get_dictionary().await {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("dictionary unavailable, transcribing without bias: {e:#}");
                Vec::new()
            }
        };
        let bias_prompt = if dictionary.is_empty() {
            None
        } else {
            Some(dictionary.join(", "))
        };

        let mut timings: BTreeMap<String, u64> = BTreeMap::new();
        let transcription_start = Instant::now();

        let (transcript, source) = if active.streaming {
            let stop = self
                .recording
                .stop_streaming_recording()
                .await
                .map_err(|e| DictationError::provider_failed(PROVIDER_STREAMING, format!("{e:#}")))?;
            timings.extend(stop.timings);
            self.tracker
                .set_recorded_ms(&session.session_id, stop.recorded_ms);

            let termination = stop.outcome.termination_text.unwrap_or_default();
            let text = reconcile_final_text(&stop.outcome.live_text, &termination);
            if text.trim().is_empty() {
                return Err(DictationError::NoAudioDetected);
            }
            (
                BackendTranscript::new(text, PROVIDER_STREAMING, settings.model.clone()),
                PROVIDER_STREAMING.to_string(),
            )
        } else {
            let captured = self
                .recording
                .stop_recording()
                .await
                .map_err(|e| DictationError::provider_failed(&settings.provider, format!("{e:#}")))?;
            timings.extend(captured.timings);
            self.tracker
                .set_recorded_ms(&session.session_id, captured.recorded_ms);

            if captured.audio.samples.is_empty() {
                return Err(DictationError::NoAudioDetected);
            }

            self.transcribe_with_echo_guard(settings, &captured.audio, &dictionary, bias_prompt)
                .await?
        };
        timings.insert("transcription_ms".into(), ms(transcription_start.elapsed()));

        let raw_text = transcript.text.clone();
        let mut text = raw_text.clone();
        let mut source = source;

        let cleanup_wanted = opts.cleanup_override.unwrap_or(settings.cleanup_enabled);
        if cleanup_wanted {
            if let Some(cleaner) = &self.cleanup {
                self.publish_stage(active, Stage::Cleaning);
                let cleanup_start = Instant::now();
                match cleaner.cleanup(&text).await {
                    Ok(cleaned) if !cleaned.trim().is_empty() => {
                        timings.insert("cleanup_ms".into(), ms(cleanup_start.elapsed()));
                        text = cleaned;
                        source = reasoned_source_tag(&source);
                    }
                    Ok(_) => {
                        log::warn!("cleanup returned empty text; delivering raw transcript");
                    }
                    Err(e) => {
                        // Cleanup never fails a dictation.
                        log::warn!("cleanup failed, delivering raw transcript: {e:#}");
                    }
                }
            } else {
                log::warn!("cleanup requested but no cleanup backend configured");
            }
        }

        self.publish_stage(active, Stage::Inserting);
        let delivery_start = Instant::now();
        let delivery = deliver(
            self.host.as_ref(),
            session.output_mode,
            session.insertion_target.as_ref(),
            &text,
        )
        .await?;
        timings.insert("delivery_ms".into(), ms(delivery_start.elapsed()));

        self.publish_stage(active, Stage::Saving);
        let record = TranscriptionRecord {
            text: text.clone(),
            raw_text: raw_text.clone(),
            meta: RecordMeta {
                session_id: session.session_id.as_str().to_string(),
                output_mode: session.output_mode,
                status: "done".into(),
                source: source.clone(),
                provider: transcript.provider.clone(),
                model: transcript.model.clone(),
                insertion_target: session.insertion_target.clone(),
                paste_succeeded: delivery.paste_succeeded,
                timings: timings.clone(),
            },
        };
        if let Err(e) = self.history.persist(record, active.pipeline_started).await {
            // Delivery already happened; losing the record is a warning.
            log::warn!("{e}");
        }

        Ok(TranscriptionResult {
            success: true,
            text,
            raw_text,
            source,
            provider: transcript.provider,
            model: transcript.model,
            timings,
            limit_reached: transcript.limit_reached,
            words_used: transcript.words_used,
            words_remaining: transcript.words_remaining,
            paste_succeeded: delivery.paste_succeeded,
            delivery_degraded: delivery.degraded,
            error: None,
        })
    }

    async fn transcribe_with_echo_guard(
        &self,
        settings: &Settings,
        audio: &AudioInput,
        dictionary: &[String],
        bias_prompt: Option<String>,
    ) -> Result<(BackendTranscript, String), DictationError> {
        let opts = TranscribeOptions {
            language: settings.language.clone(),
            initial_prompt: bias_prompt.clone(),
            model: None,
        };
        let routed = self.router.transcribe(settings, audio, &opts).await?;

        if bias_prompt.is_none() {
            return Ok((routed.transcript, routed.source));
        }

        let verdict = detect_prompt_echo(&routed.transcript.text, dictionary);
        if !verdict.is_echo {
            return Ok((routed.transcript, routed.source));
        }

        log::warn!(
            "transcript echoed the vocabulary prompt (coverage {:.2}, jaccard {:.2}); retrying without bias",
            verdict.coverage,
            verdict.jaccard
        );

        let retry_opts = TranscribeOptions {
            language: settings.language.clone(),
            initial_prompt: None,
            model: None,
        };
        let retried = self.router.transcribe(settings, audio, &retry_opts).await?;

        if detect_prompt_echo(&retried.transcript.text, dictionary).is_echo {
            return Err(DictationError::PromptEcho);
        }
        Ok((retried.transcript, retried.source))
    }

    fn annotate(&self, record: &mut StageProgress, session: &DictationSession, settings: &Settings) {
        record.session_id = Some(session.session_id.clone());
        record.output_mode = Some(session.output_mode);
        record.provider = Some(settings.provider.clone());
        record.model = Some(settings.model.clone());
        record.job_id = self
            .tracker
            .get(&session.session_id)
            .map(|job| job.job_id);
    }

    fn publish_stage(&self, active: &ActiveSession, stage: Stage) {
        let mut record = self.progress.current();
        record.advance(stage);
        self.annotate(&mut record, &active.session, &active.settings);
        record.elapsed_ms = Some(ms(active.pipeline_started.elapsed()));
        record.recorded_ms = self
            .tracker
            .get(&active.session.session_id)
            .and_then(|job| job.recorded_ms);
        self.progress
            .publish_if_foreground(record, active.is_foreground());
    }

    fn publish_terminal(
        &self,
        active: &ActiveSession,
        stage: Stage,
        message: Option<String>,
        result: Option<&TranscriptionResult>,
    ) {
        let mut record = self.progress.current();
        record.advance(stage);
        self.annotate(&mut record, &active.session, &active.settings);
        record.elapsed_ms = Some(ms(active.pipeline_started.elapsed()));
        record.message = message;
        if let Some(result) = result {
            record.generated_chars = Some(char_count(&result.text));
            record.generated_words = Some(word_count(&result.text));
        }
        self.progress
            .publish_if_foreground(record, active.is_foreground());

        if active.is_foreground() {
            let tracker = self.tracker.clone();
            self.progress
                .arm_idle_reset(move || tracker.has_active_jobs());
        }
    }
}
