use anyhow::{Context, anyhow};
use serde::Deserialize;

pub const END_SENTINEL: &str = "[DONE]";

/// Decodes an incremental transcript event feed.
///
/// The feed is newline-delimited JSON frames (`delta`, `segment`, `done`)
/// terminated by the `[DONE]` sentinel line. Network reads can split a frame
/// anywhere, so input is buffered until a full line is available; the trailing
/// partial line stays queued for the next push.
#[derive(Debug, Default)]
pub struct TranscriptStreamParser {
    buf: String,
    accumulated: String,
    done_text: Option<String>,
    ended: bool,
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl TranscriptStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(&mut self, chunk: &str) -> anyhow::Result<()> {
        self.buf.push_str(chunk);

        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            self.consume_line(line.trim())?;
        }
        Ok(())
    }

    fn consume_line(&mut self, line: &str) -> anyhow::Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        if line == END_SENTINEL {
            self.ended = true;
            return Ok(());
        }
        if self.ended {
            // Frames after the sentinel are a protocol violation; ignore them
            // rather than corrupting an already-complete transcript.
            log::warn!("transcript frame after end sentinel ignored");
            return Ok(());
        }

        let frame: Frame = serde_json::from_str(line).context("decode transcript frame")?;
        match frame.kind.as_str() {
            "delta" | "segment" => self.accumulated.push_str(&frame.text),
            "done" => self.done_text = Some(frame.text),
            other => return Err(anyhow!("unknown transcript frame type: {other}")),
        }
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// Final transcript after the feed ends.
    ///
    /// Providers occasionally truncate the `done` summary; when it is shorter
    /// than what was accumulated frame by frame, the accumulation wins and the
    /// mismatch is logged. A `done` at least as long is trusted as the
    /// provider's final pass.
    pub fn final_text(&self) -> String {
        match &self.done_text {
            Some(done) if done.chars().count() >= self.accumulated.chars().count() => done.clone(),
            Some(done) => {
                log::warn!(
                    "done frame shorter than accumulated transcript ({} < {} chars); keeping accumulation",
                    done.chars().count(),
                    self.accumulated.chars().count()
                );
                self.accumulated.clone()
            }
            None => self.accumulated.clone(),
        }
    }
}
