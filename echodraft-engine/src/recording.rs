use crate::session::ms;
use crate::traits::{
    AudioInput, MicrophoneCapture, PermissionState, StreamOutcome, StreamingTranscriber,
};
use anyhow::anyhow;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Bound on how long a stop waits for the capture tail to drain.
pub const FLUSH_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    pub audio: AudioInput,
    pub recorded_ms: u64,
    pub timings: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStopOutcome {
    pub outcome: StreamOutcome,
    pub recorded_ms: u64,
    pub timings: BTreeMap<String, u64>,
}

enum ActiveCapture {
    Buffered {
        samples: Arc<StdMutex<Vec<f32>>>,
        collector: JoinHandle<()>,
        sample_rate_hz: u32,
        timings: BTreeMap<String, u64>,
    },
    Streaming {
        sink: Arc<dyn StreamingTranscriber>,
        forwarder: JoinHandle<()>,
        started: Instant,
        timings: BTreeMap<String, u64>,
    },
}

/// Owns the microphone. At most one capture is active; starts while one is
/// active return false without side effects.
pub struct RecordingController {
    capture: Arc<dyn MicrophoneCapture>,
    state: Mutex<Option<ActiveCapture>>,
    flush_timeout: Duration,
}

impl RecordingController {
    pub fn new(capture: Arc<dyn MicrophoneCapture>) -> Self {
        Self::with_flush_timeout(capture, FLUSH_DRAIN_TIMEOUT)
    }

    pub fn with_flush_timeout(capture: Arc<dyn MicrophoneCapture>, flush_timeout: Duration) -> Self {
        Self {
            capture,
            state: Mutex::new(None),
            flush_timeout,
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Pre-opens and closes capture so the first real recording starts warm.
    /// No-ops unless microphone permission is already granted; warm-up must
    /// never be the thing that triggers a permission prompt.
    pub async fn warm_up(&self, sample_rate_hz: u32) {
        if self.capture.permission_state().await != PermissionState::Granted {
            return;
        }
        if self.state.lock().await.is_some() {
            return;
        }
        match self.capture.open(sample_rate_hz).await {
            Ok(_rx) => {
                if let Err(e) = self.capture.stop().await {
                    log::warn!("microphone warm-up stop failed: {e:#}");
                }
            }
            Err(e) => log::warn!("microphone warm-up open failed: {e:#}"),
        }
    }

    /// Starts a buffered recording. `triggered_at` is when the user gesture
    /// fired, for hotkey-to-start diagnostics.
    pub async fn start_recording(
        &self,
        sample_rate_hz: u32,
        triggered_at: Option<Instant>,
    ) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(false);
        }

        let open_start = Instant::now();
        let mut rx = self.capture.open(sample_rate_hz).await?;

        let mut timings = BTreeMap::new();
        timings.insert("capture_open_ms".into(), ms(open_start.elapsed()));
        if let Some(t) = triggered_at {
            timings.insert("hotkey_to_start_ms".into(), ms(t.elapsed()));
        }

        let samples: Arc<StdMutex<Vec<f32>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        let collector = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(&chunk);
                }
            }
        });

        *state = Some(ActiveCapture::Buffered {
            samples,
            collector,
            sample_rate_hz,
            timings,
        });
        Ok(true)
    }

    /// Starts a streaming recording, forwarding chunks into `sink` as they
    /// arrive. Backpressure inside the sink is the sink's problem; the
    /// forwarder only stops when the sink reports it can take no more.
    pub async fn start_streaming_recording(
        &self,
        sample_rate_hz: u32,
        sink: Arc<dyn StreamingTranscriber>,
        triggered_at: Option<Instant>,
    ) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(false);
        }

        let open_start = Instant::now();
        let mut rx = self.capture.open(sample_rate_hz).await?;

        let mut timings = BTreeMap::new();
        timings.insert("capture_open_ms".into(), ms(open_start.elapsed()));
        if let Some(t) = triggered_at {
            timings.insert("hotkey_to_start_ms".into(), ms(t.elapsed()));
        }

        let forward_sink = Arc::clone(&sink);
        let forwarder = tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if !forward_sink.send_audio(chunk).await {
                    log::warn!("streaming sink rejected audio; stopping forwarder");
                    break;
                }
            }
        });

        *state = Some(ActiveCapture::Streaming {
            sink,
            forwarder,
            started: Instant::now(),
            timings,
        });
        Ok(true)
    }

    /// Stops a buffered recording and returns the captured audio once the
    /// tail has drained. Never hangs: draining is bounded by the flush
    /// timeout, after which whatever arrived is returned.
    pub async fn stop_recording(&self) -> anyhow::Result<CapturedAudio> {
        let mut state = self.state.lock().await;
        let (samples, collector, sample_rate_hz, mut timings) = match state.take() {
            Some(ActiveCapture::Buffered {
                samples,
                collector,
                sample_rate_hz,
                timings,
            }) => (samples, collector, sample_rate_hz, timings),
            other => {
                // Put a mismatched capture back rather than destroying it.
                *state = other;
                return Err(anyhow!("no buffered recording in progress"));
            }
        };

        self.capture.stop().await?;

        let flush_start = Instant::now();
        if tokio::time::timeout(self.flush_timeout, collector).await.is_err() {
            log::warn!("capture flush did not drain in time; returning partial audio");
        }
        timings.insert("flush_drain_ms".into(), ms(flush_start.elapsed()));

        let samples = samples
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();
        let audio = AudioInput {
            sample_rate_hz,
            samples,
        };
        let recorded_ms = audio.duration_ms();
        timings.insert("recorded_ms".into(), recorded_ms);

        Ok(CapturedAudio {
            audio,
            recorded_ms,
            timings,
        })
    }

    /// Stops a streaming recording: drains the capture tail (bounded), asks
    /// the provider for a final utterance boundary, then stops the session.
    pub async fn stop_streaming_recording(&self) -> anyhow::Result<StreamStopOutcome> {
        let mut state = self.state.lock().await;
        let (sink, forwarder, started, mut timings) = match state.take() {
            Some(ActiveCapture::Streaming {
                sink,
                forwarder,
                started,
                timings,
            }) => (sink, forwarder, started, timings),
            other => {
                *state = other;
                return Err(anyhow!("no streaming recording in progress"));
            }
        };

        let recorded_ms = ms(started.elapsed());
        self.capture.stop().await?;

        // Awaiting flush: the capture tail must reach the sink before we ask
        // the provider to finalize.
        let flush_start = Instant::now();
        if tokio::time::timeout(self.flush_timeout, forwarder).await.is_err() {
            log::warn!("streaming capture flush did not drain in time");
        }
        timings.insert("flush_drain_ms".into(), ms(flush_start.elapsed()));
        timings.insert("recorded_ms".into(), recorded_ms);

        sink.force_endpoint().await;
        let outcome = sink.stop().await?;

        Ok(StreamStopOutcome {
            outcome,
            recorded_ms,
            timings,
        })
    }

    /// Releases the microphone and discards everything captured so far.
    pub async fn cancel(&self) -> bool {
        let active = self.state.lock().await.take();
        let Some(active) = active else {
            return false;
        };

        self.capture.cancel().await;
        match active {
            ActiveCapture::Buffered { collector, .. } => collector.abort(),
            ActiveCapture::Streaming { forwarder, sink, .. } => {
                forwarder.abort();
                // Best-effort: end the provider session so it doesn't linger.
                let _ = sink.stop().await;
            }
        }
        true
    }
}
