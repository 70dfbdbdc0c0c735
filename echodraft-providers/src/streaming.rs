use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, anyhow};
use base64::Engine;
use futures_util::{SinkExt, StreamExt, future};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use url::Url;

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);

fn join_committed_and_partial(committed: &str, partial: &str) -> String {
    let c = committed.trim();
    let p = partial.trim();

    if c.is_empty() {
        return p.to_string();
    }
    if p.is_empty() {
        return c.to_string();
    }
    format!("{c} {p}")
}

fn should_emit_backpressure_warning(dropped: u64) -> bool {
    // Emit on first drop, then periodically.
    dropped > 0 && (dropped == 1 || dropped % 50 == 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSttConfig {
    pub ws_url: Url,
    pub api_key: String,

    pub model: String,
    pub language: Option<String>,
    pub sample_rate_hz: u32,

    pub connect_timeout: Duration,
    pub stop_timeout: Duration,
}

impl StreamingSttConfig {
    pub fn new(ws_url: Url, api_key: impl Into<String>, sample_rate_hz: u32) -> Self {
        Self {
            ws_url,
            api_key: api_key.into(),
            model: "streaming-v1".into(),
            language: None,
            sample_rate_hz,
            connect_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingEvent {
    SessionReady { session_id: String },
    LiveText { committed: String, partial: String },
    Warning { kind: String, message: String },
    Error { code: String, error: String },
}

/// What a stopped streaming session hands back: the live text accumulated
/// during recording, plus whatever final text the server attached to its
/// close frame. Reconciling the two is the caller's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStop {
    pub live_text: String,
    pub termination_text: Option<String>,
}

#[derive(Debug)]
enum StreamingCmd {
    AudioChunk { pcm_s16le: Vec<u8> },
    ForceEndpoint,
    Stop { respond_to: oneshot::Sender<anyhow::Result<StreamStop>> },
    Shutdown,
}

#[derive(Clone)]
pub struct StreamingSessionHandle {
    tx: mpsc::Sender<StreamingCmd>,
}

impl StreamingSessionHandle {
    pub fn try_send_audio_chunk(&self, pcm_s16le: Vec<u8>) -> bool {
        self.tx
            .try_send(StreamingCmd::AudioChunk { pcm_s16le })
            .is_ok()
    }

    pub async fn send_audio_chunk(&self, pcm_s16le: Vec<u8>) -> bool {
        self.tx
            .send(StreamingCmd::AudioChunk { pcm_s16le })
            .await
            .is_ok()
    }

    /// Asks the server to close the current utterance without ending the
    /// session. Best-effort.
    pub async fn force_endpoint(&self) {
        let _ = self.tx.send(StreamingCmd::ForceEndpoint).await;
    }

    pub async fn stop(&self) -> anyhow::Result<StreamStop> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(StreamingCmd::Stop { respond_to: tx })
            .await
            .map_err(|_| anyhow!("streaming session closed"))?;
        rx.await.map_err(|_| anyhow!("streaming session closed"))?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(StreamingCmd::Shutdown).await;
    }
}

pub async fn spawn_streaming_session(
    cfg: StreamingSttConfig,
) -> anyhow::Result<(StreamingSessionHandle, mpsc::Receiver<StreamingEvent>)> {
    if cfg.api_key.trim().is_empty() {
        return Err(anyhow!("missing streaming API key"));
    }

    // `IntoClientRequest` isn't implemented for `url::Url` in tungstenite 0.26 without extra
    // features; convert to string-ish form first.
    let mut req = cfg
        .ws_url
        .as_str()
        .into_client_request()
        .context("build websocket request")?;
    req.headers_mut().insert(
        "authorization",
        format!("Bearer {}", cfg.api_key)
            .parse()
            .map_err(|_| anyhow!("invalid streaming API key header"))?,
    );

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<StreamingCmd>(64);
    let (evt_tx, evt_rx) = mpsc::channel::<StreamingEvent>(64);

    // Connect with a hard timeout so we can't hang on a bad network.
    let (ws, _resp) =
        tokio::time::timeout(cfg.connect_timeout, tokio_tungstenite::connect_async(req))
            .await
            .map_err(|_| anyhow!("streaming connect timed out"))?
            .context("connect streaming websocket")?;

    let (ws_write, mut ws_read) = ws.split();

    // Writer task: keeps reads responsive by ensuring we never await socket writes in the main loop.
    // Control messages get their own lane so pongs and the stop frame can't be starved by audio backlog.
    let (out_ctrl_tx, mut out_ctrl_rx) = mpsc::channel::<Message>(32);
    let (out_audio_tx, mut out_audio_rx) = mpsc::channel::<Message>(256);
    tokio::spawn(async move {
        let mut ws_write = ws_write;
        let mut ctrl_closed = false;
        let mut audio_closed = false;

        loop {
            let next_msg: Option<Message> = tokio::select! {
                biased;
                msg = out_ctrl_rx.recv(), if !ctrl_closed => {
                    match msg {
                        Some(m) => Some(m),
                        None => { ctrl_closed = true; None }
                    }
                }
                msg = out_audio_rx.recv(), if !audio_closed => {
                    match msg {
                        Some(m) => Some(m),
                        None => { audio_closed = true; None }
                    }
                }
            };

            let Some(msg) = next_msg else {
                if ctrl_closed && audio_closed {
                    break;
                }
                continue;
            };

            let res = tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await;
            if !matches!(res, Ok(Ok(()))) {
                break;
            }
        }

        let _ = ws_write.send(Message::Close(None)).await;
    });

    // Open the session before any audio flows.
    let start = build_session_start_message(&cfg);
    out_ctrl_tx
        .send(Message::Text(start.into()))
        .await
        .map_err(|_| anyhow!("websocket closed before session start"))?;

    let stop_timeout = cfg.stop_timeout;

    tokio::spawn(async move {
        let mut committed = String::new();
        let mut partial = String::new();

        let mut dropped_outbound_audio_chunks: u64 = 0;

        // Server-level errors (auth/quota/etc) are fatal; the details are kept
        // so `stop()` can return a meaningful error even if the error arrived
        // earlier during recording.
        let mut fatal_error: Option<(String, String)> = None;

        let mut stop_pending: Option<oneshot::Sender<anyhow::Result<StreamStop>>> = None;
        let mut stop_deadline_sleep: Option<Pin<Box<tokio::time::Sleep>>> = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    match cmd {
                        StreamingCmd::AudioChunk { pcm_s16le } => {
                            if fatal_error.is_some() || stop_pending.is_some() {
                                continue;
                            }

                            let msg = build_audio_message(&pcm_s16le);
                            match out_audio_tx.try_send(Message::Text(msg.into())) {
                                Ok(()) => {}
                                Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                                    // Best-effort: drop the chunk rather than stalling reads.
                                    // Surface it so the drop isn't silent.
                                    dropped_outbound_audio_chunks = dropped_outbound_audio_chunks.saturating_add(1);
                                    if should_emit_backpressure_warning(dropped_outbound_audio_chunks) {
                                        let _ = evt_tx.try_send(StreamingEvent::Warning {
                                            kind: "client_backpressure".into(),
                                            message: format!(
                                                "streaming backpressure: dropped {dropped_outbound_audio_chunks} audio chunks; transcript may be incomplete."
                                            ),
                                        });
                                    }
                                }
                                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {
                                    let _ = evt_tx.try_send(StreamingEvent::Error { code: "disconnect".into(), error: "websocket closed".into() });
                                    break;
                                }
                            }
                        }
                        StreamingCmd::ForceEndpoint => {
                            if fatal_error.is_some() {
                                continue;
                            }
                            let _ = out_ctrl_tx.try_send(Message::Text(
                                r#"{"type":"endpoint"}"#.into(),
                            ));
                        }
                        StreamingCmd::Stop { respond_to } => {
                            if stop_pending.is_some() {
                                let _ = respond_to.send(Err(anyhow!("stop already in progress")));
                                continue;
                            }

                            if let Some((c, e)) = fatal_error.take() {
                                let _ = respond_to.send(Err(anyhow!("streaming error ({c}): {e}")));
                                break;
                            }

                            let sent = tokio::time::timeout(
                                Duration::from_secs(1),
                                out_ctrl_tx.send(Message::Text(r#"{"type":"session.stop"}"#.into())),
                            )
                            .await;
                            if !matches!(sent, Ok(Ok(()))) {
                                let _ = respond_to.send(Err(anyhow!("websocket closed")));
                                break;
                            }

                            stop_pending = Some(respond_to);
                            stop_deadline_sleep = Some(Box::pin(tokio::time::sleep(stop_timeout)));
                        }
                        StreamingCmd::Shutdown => {
                            break;
                        }
                    }
                }

                msg = ws_read.next() => {
                    let Some(msg) = msg else { break; };
                    let msg = match msg {
                        Ok(m) => m,
                        Err(_) => {
                            let _ = evt_tx.send(StreamingEvent::Error { code: "disconnect".into(), error: "websocket read failed".into() }).await;
                            break;
                        }
                    };

                    let text = match msg {
                        Message::Text(t) => t.to_string(),
                        Message::Binary(b) => String::from_utf8_lossy(&b).to_string(),
                        Message::Close(_) => break,
                        Message::Ping(p) => {
                            // Best-effort: if we can't respond with Pong, treat as disconnect.
                            match out_ctrl_tx.try_send(Message::Pong(p)) {
                                Ok(()) => {}
                                Err(_) => {
                                    let _ = evt_tx.try_send(StreamingEvent::Error { code: "disconnect".into(), error: "failed to send pong".into() });
                                    break;
                                }
                            }
                            continue;
                        }
                        Message::Pong(_) => continue,
                        _ => continue,
                    };

                    match parse_streaming_message(&text) {
                        Ok(ParsedStreaming::SessionReady { session_id }) => {
                            let _ = evt_tx.send(StreamingEvent::SessionReady { session_id }).await;
                        }
                        Ok(ParsedStreaming::Delta { text }) => {
                            partial = text;
                            let _ = evt_tx.send(StreamingEvent::LiveText { committed: committed.clone(), partial: partial.clone() }).await;
                        }
                        Ok(ParsedStreaming::Segment { text }) => {
                            if !committed.is_empty() && !committed.ends_with(' ') {
                                committed.push(' ');
                            }
                            committed.push_str(text.trim());
                            partial.clear();
                            let _ = evt_tx.send(StreamingEvent::LiveText { committed: committed.clone(), partial: partial.clone() }).await;
                        }
                        Ok(ParsedStreaming::SessionClosed { text }) => {
                            if let Some(done) = stop_pending.take() {
                                let _ = done.send(Ok(StreamStop {
                                    live_text: join_committed_and_partial(&committed, &partial),
                                    termination_text: text,
                                }));
                                stop_deadline_sleep = None;
                            }
                            break;
                        }
                        Ok(ParsedStreaming::Error { code, error }) => {
                            let _ = evt_tx.send(StreamingEvent::Error { code: code.clone(), error: error.clone() }).await;

                            if fatal_error.is_none() {
                                fatal_error = Some((code.clone(), error.clone()));
                            }

                            if let Some(done) = stop_pending.take() {
                                let _ = done.send(Err(anyhow!("streaming error ({code}): {error}")));
                                stop_deadline_sleep = None;
                            }
                        }
                        Err(_) => {
                            // Ignore unknown/bad frames.
                        }
                    }
                }

                _ = async {
                    if let Some(s) = stop_deadline_sleep.as_mut() {
                        s.as_mut().await;
                    } else {
                        future::pending::<()>().await;
                    }
                } => {
                    if let Some(done) = stop_pending.take() {
                        // The close frame never arrived; resolve with the live
                        // text so stop always returns within the deadline.
                        let _ = done.send(Ok(StreamStop {
                            live_text: join_committed_and_partial(&committed, &partial),
                            termination_text: None,
                        }));
                    }
                    stop_deadline_sleep = None;
                    break;
                }
            }
        }

        // Best-effort: if stop is still pending, resolve it with any text we have.
        if let Some(done) = stop_pending.take() {
            let _ = done.send(Ok(StreamStop {
                live_text: join_committed_and_partial(&committed, &partial),
                termination_text: None,
            }));
        }

        // Dropping the writer senders ends the writer task, which sends Close.
    });

    Ok((StreamingSessionHandle { tx: cmd_tx }, evt_rx))
}

fn build_session_start_message(cfg: &StreamingSttConfig) -> String {
    let mut obj = serde_json::json!({
        "type": "session.start",
        "model": cfg.model,
        "sample_rate": cfg.sample_rate_hz,
        "encoding": "pcm_s16le",
    });

    let lang = cfg
        .language
        .as_ref()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty());
    if let Some(lang) = lang {
        if let Some(map) = obj.as_object_mut() {
            map.insert("language".into(), serde_json::Value::String(lang.to_string()));
        }
    }

    obj.to_string()
}

fn build_audio_message(pcm_s16le: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(pcm_s16le);
    serde_json::json!({
        "type": "audio",
        "audio": b64,
    })
    .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParsedStreaming {
    SessionReady { session_id: String },
    Delta { text: String },
    Segment { text: String },
    SessionClosed { text: Option<String> },
    Error { code: String, error: String },
}

fn parse_streaming_message(s: &str) -> anyhow::Result<ParsedStreaming> {
    let v: serde_json::Value = serde_json::from_str(s).context("decode streaming json")?;
    let t = v
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing type"))?;

    match t {
        "session.ready" => {
            let session_id = v
                .get("session_id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Ok(ParsedStreaming::SessionReady { session_id })
        }
        "transcript.delta" => {
            let text = v.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(ParsedStreaming::Delta { text })
        }
        "transcript.segment" => {
            let text = v.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(ParsedStreaming::Segment { text })
        }
        "session.closed" => {
            let text = v
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Ok(ParsedStreaming::SessionClosed { text })
        }
        "error" => {
            let code = v.get("code").and_then(|v| v.as_str()).unwrap_or("error").to_string();
            let err = v.get("error").and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(ParsedStreaming::Error { code, error: err })
        }
        other => Err(anyhow!("unknown type: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn joins_committed_and_partial_text() {
        assert_eq!(join_committed_and_partial("", ""), "");
        assert_eq!(join_committed_and_partial("hello", ""), "hello");
        assert_eq!(join_committed_and_partial("", "par"), "par");
        assert_eq!(join_committed_and_partial("hello", "par"), "hello par");
        assert_eq!(join_committed_and_partial(" hello ", " par "), "hello par");
    }

    #[test]
    fn backpressure_warning_throttles() {
        assert!(!should_emit_backpressure_warning(0));
        assert!(should_emit_backpressure_warning(1));
        assert!(!should_emit_backpressure_warning(2));
        assert!(!should_emit_backpressure_warning(49));
        assert!(should_emit_backpressure_warning(50));
        assert!(should_emit_backpressure_warning(100));
    }

    #[test]
    fn session_start_includes_language_only_when_set() {
        let mut cfg = StreamingSttConfig::new(
            Url::parse("ws://example.com/stream").unwrap(),
            "k",
            16_000,
        );
        let msg = build_session_start_message(&cfg);
        assert!(msg.contains("session.start"));
        assert!(msg.contains("pcm_s16le"));
        assert!(!msg.contains("language"));

        cfg.language = Some("en".into());
        let msg = build_session_start_message(&cfg);
        assert!(msg.contains("\"language\":\"en\""));
    }

    #[test]
    fn parses_delta_segment_and_closed() {
        let d = parse_streaming_message(r#"{"type":"transcript.delta","text":"hi"}"#).unwrap();
        assert_eq!(d, ParsedStreaming::Delta { text: "hi".into() });

        let s = parse_streaming_message(r#"{"type":"transcript.segment","text":"hello"}"#).unwrap();
        assert_eq!(s, ParsedStreaming::Segment { text: "hello".into() });

        let c = parse_streaming_message(r#"{"type":"session.closed","text":"final"}"#).unwrap();
        assert_eq!(c, ParsedStreaming::SessionClosed { text: Some("final".into()) });

        let c = parse_streaming_message(r#"{"type":"session.closed"}"#).unwrap();
        assert_eq!(c, ParsedStreaming::SessionClosed { text: None });
    }

    #[test]
    fn parses_error_with_code() {
        let e = parse_streaming_message(r#"{"type":"error","code":"auth","error":"bad key"}"#)
            .unwrap();
        assert_eq!(
            e,
            ParsedStreaming::Error {
                code: "auth".into(),
                error: "bad key".into(),
            }
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = parse_streaming_message(r#"{"type":"new_type","text":"hi"}"#)
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown type"));
    }

    fn test_cfg(addr: std::net::SocketAddr) -> StreamingSttConfig {
        let mut cfg = StreamingSttConfig::new(
            Url::parse(&format!("ws://{addr}/stream")).unwrap(),
            "k",
            16_000,
        );
        cfg.connect_timeout = Duration::from_secs(2);
        cfg.stop_timeout = Duration::from_secs(2);
        cfg
    }

    #[tokio::test]
    async fn integration_stop_returns_live_and_termination_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let _ = ws
                .send(Message::Text(
                    r#"{"type":"session.ready","session_id":"s"}"#.into(),
                ))
                .await;

            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(txt) = msg {
                    if txt.contains("session.stop") {
                        let _ = ws
                            .send(Message::Text(
                                r#"{"type":"session.closed","text":"hello world final"}"#.into(),
                            ))
                            .await;
                        break;
                    } else if txt.contains("\"type\":\"audio\"") {
                        let _ = ws
                            .send(Message::Text(
                                r#"{"type":"transcript.segment","text":"hello world"}"#.into(),
                            ))
                            .await;
                    }
                }
            }
        });

        let (handle, mut events) = spawn_streaming_session(test_cfg(addr)).await.unwrap();
        let _ = events.recv().await; // session.ready

        assert!(handle.send_audio_chunk(vec![0u8; 8]).await);
        loop {
            if let Some(StreamingEvent::LiveText { committed, .. }) = events.recv().await {
                if committed.contains("hello world") {
                    break;
                }
            }
        }

        let out = handle.stop().await.unwrap();
        assert_eq!(out.live_text, "hello world");
        assert_eq!(out.termination_text.as_deref(), Some("hello world final"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn integration_emits_delta_then_segment_live_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let _ = ws
                .send(Message::Text(
                    r#"{"type":"session.ready","session_id":"s"}"#.into(),
                ))
                .await;

            let mut sent_delta = false;
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(txt) = msg {
                    if txt.contains("session.stop") {
                        let _ = ws
                            .send(Message::Text(r#"{"type":"session.closed"}"#.into()))
                            .await;
                        break;
                    } else if txt.contains("\"type\":\"audio\"") {
                        if sent_delta {
                            let _ = ws
                                .send(Message::Text(
                                    r#"{"type":"transcript.segment","text":"hello"}"#.into(),
                                ))
                                .await;
                        } else {
                            sent_delta = true;
                            let _ = ws
                                .send(Message::Text(
                                    r#"{"type":"transcript.delta","text":"hel"}"#.into(),
                                ))
                                .await;
                        }
                    }
                }
            }
        });

        let (handle, mut events) = spawn_streaming_session(test_cfg(addr)).await.unwrap();
        let _ = events.recv().await; // session.ready

        assert!(handle.send_audio_chunk(vec![0u8; 8]).await);
        let saw_partial = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Some(StreamingEvent::LiveText { partial, .. }) if partial == "hel" => {
                        return true;
                    }
                    Some(_) => continue,
                    None => return false,
                }
            }
        })
        .await
        .unwrap();
        assert!(saw_partial);

        // A segment commits the text and clears the partial.
        assert!(handle.send_audio_chunk(vec![0u8; 8]).await);
        loop {
            if let Some(StreamingEvent::LiveText { committed, partial }) = events.recv().await {
                if committed == "hello" {
                    assert!(partial.is_empty());
                    break;
                }
            }
        }

        let out = handle.stop().await.unwrap();
        assert_eq!(out.live_text, "hello");
        assert_eq!(out.termination_text, None);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn integration_stop_deadline_resolves_without_close_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let _ = ws
                .send(Message::Text(
                    r#"{"type":"session.ready","session_id":"s"}"#.into(),
                ))
                .await;

            // Commit one segment, then never answer the stop.
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(txt) = msg {
                    if txt.contains("\"type\":\"audio\"") {
                        let _ = ws
                            .send(Message::Text(
                                r#"{"type":"transcript.segment","text":"partial result"}"#.into(),
                            ))
                            .await;
                    }
                }
            }
        });

        let mut cfg = test_cfg(addr);
        cfg.stop_timeout = Duration::from_millis(300);

        let (handle, mut events) = spawn_streaming_session(cfg).await.unwrap();
        let _ = events.recv().await; // session.ready

        assert!(handle.send_audio_chunk(vec![0u8; 8]).await);
        loop {
            if let Some(StreamingEvent::LiveText { committed, .. }) = events.recv().await {
                if committed.contains("partial result") {
                    break;
                }
            }
        }

        let out = tokio::time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.live_text, "partial result");
        assert_eq!(out.termination_text, None);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn integration_server_error_propagates_to_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let _ = ws
                .send(Message::Text(
                    r#"{"type":"session.ready","session_id":"s"}"#.into(),
                ))
                .await;
            let _ = ws
                .send(Message::Text(
                    r#"{"type":"error","code":"auth","error":"bad key"}"#.into(),
                ))
                .await;

            // Keep the socket open long enough for the client to receive the error.
            let _ = ws.next().await;
        });

        let (handle, mut events) = spawn_streaming_session(test_cfg(addr)).await.unwrap();
        let _ = events.recv().await; // session.ready

        loop {
            if let Some(StreamingEvent::Error { code, error }) = events.recv().await {
                assert_eq!(code, "auth");
                assert!(error.contains("bad key"));
                break;
            }
        }

        let err = handle.stop().await.err().unwrap();
        let s = err.to_string();
        assert!(s.contains("auth"));
        assert!(s.contains("bad key"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn integration_double_stop_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let _ = ws
                .send(Message::Text(
                    r#"{"type":"session.ready","session_id":"s"}"#.into(),
                ))
                .await;

            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(txt) = msg {
                    if txt.contains("session.stop") {
                        tokio::time::sleep(Duration::from_millis(400)).await;
                        let _ = ws
                            .send(Message::Text(
                                r#"{"type":"session.closed","text":"final"}"#.into(),
                            ))
                            .await;
                        break;
                    }
                }
            }
        });

        let (handle, mut events) = spawn_streaming_session(test_cfg(addr)).await.unwrap();
        let _ = events.recv().await; // session.ready

        let h1 = handle.clone();
        let t1 = tokio::spawn(async move { h1.stop().await });

        // Give the session loop a moment to set the pending stop.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = handle.stop().await.err().unwrap();
        assert!(err.to_string().contains("stop already in progress"));

        let ok = tokio::time::timeout(Duration::from_secs(3), t1)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(ok.termination_text.as_deref(), Some("final"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn integration_force_endpoint_reaches_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let _ = ws
                .send(Message::Text(
                    r#"{"type":"session.ready","session_id":"s"}"#.into(),
                ))
                .await;

            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(txt) = msg {
                    if txt.contains("\"type\":\"endpoint\"") {
                        let _ = ws
                            .send(Message::Text(
                                r#"{"type":"transcript.segment","text":"cut here"}"#.into(),
                            ))
                            .await;
                    } else if txt.contains("session.stop") {
                        let _ = ws
                            .send(Message::Text(r#"{"type":"session.closed"}"#.into()))
                            .await;
                        break;
                    }
                }
            }
        });

        let (handle, mut events) = spawn_streaming_session(test_cfg(addr)).await.unwrap();
        let _ = events.recv().await; // session.ready

        handle.force_endpoint().await;
        loop {
            if let Some(StreamingEvent::LiveText { committed, .. }) = events.recv().await {
                if committed.contains("cut here") {
                    break;
                }
            }
        }

        let out = handle.stop().await.unwrap();
        assert_eq!(out.live_text, "cut here");
        handle.shutdown().await;
    }
}
