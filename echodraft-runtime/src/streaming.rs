use crate::wav::pcm_s16le_from_f32;
use async_trait::async_trait;
use echodraft_engine::traits::{StreamOutcome, StreamingFactory, StreamingTranscriber};
use echodraft_providers::streaming::{
    StreamingEvent, StreamingSessionHandle, StreamingSttConfig, spawn_streaming_session,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opens websocket streaming sessions from the persisted configuration and
/// adapts them to the engine's transcriber traits.
#[derive(Clone)]
pub struct WsStreamingFactory {
    cfg: StreamingSttConfig,
}

impl std::fmt::Debug for WsStreamingFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsStreamingFactory")
            .field("ws_url", &self.cfg.ws_url.as_str())
            .field("model", &self.cfg.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl WsStreamingFactory {
    pub fn new(cfg: StreamingSttConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl StreamingFactory for WsStreamingFactory {
    /// Connects and authenticates once, then tears the session down. Pays
    /// the TLS handshake cost before the user starts speaking.
    async fn warmup(&self) -> anyhow::Result<()> {
        let (handle, _events) = spawn_streaming_session(self.cfg.clone()).await?;
        handle.shutdown().await;
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<Arc<dyn StreamingTranscriber>> {
        let (handle, events) = spawn_streaming_session(self.cfg.clone()).await?;
        drain_events(events);
        Ok(Arc::new(WsStreamingSession { handle }))
    }
}

/// The pipeline only needs the final text from `stop`; live events are
/// drained here so the session's writer lanes never stall, with warnings
/// and errors forwarded to the log.
fn drain_events(mut events: mpsc::Receiver<StreamingEvent>) {
    tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            match ev {
                StreamingEvent::SessionReady { session_id } => {
                    log::debug!("streaming session ready: {session_id}");
                }
                StreamingEvent::LiveText { .. } => {}
                StreamingEvent::Warning { kind, message } => {
                    log::warn!("streaming warning [{kind}]: {message}");
                }
                StreamingEvent::Error { code, error } => {
                    log::warn!("streaming error [{code}]: {error}");
                }
            }
        }
    });
}

struct WsStreamingSession {
    handle: StreamingSessionHandle,
}

#[async_trait]
impl StreamingTranscriber for WsStreamingSession {
    async fn send_audio(&self, samples: Vec<f32>) -> bool {
        self.handle
            .send_audio_chunk(pcm_s16le_from_f32(&samples))
            .await
    }

    async fn force_endpoint(&self) {
        self.handle.force_endpoint().await;
    }

    async fn stop(&self) -> anyhow::Result<StreamOutcome> {
        let stop = self.handle.stop().await?;
        Ok(StreamOutcome {
            live_text: stop.live_text,
            termination_text: stop.termination_text,
        })
    }
}
