use crate::traits::HostActions;
use echodraft_core::error::DictationError;
use echodraft_core::types::{InsertionTarget, OutputMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// None in clipboard mode, where no paste is attempted.
    pub paste_succeeded: Option<bool>,
    /// Insert mode fell back to leaving the text in the clipboard.
    pub degraded: bool,
}

/// Delivers the final text.
///
/// The clipboard is written before any paste attempt so the text survives
/// every failure mode. Insert mode pastes into the target captured at
/// recording start; a stale or missing target fails closed, with no paste into
/// whatever window happens to be focused now.
pub async fn deliver(
    host: &dyn HostActions,
    mode: OutputMode,
    target: Option<&InsertionTarget>,
    text: &str,
) -> Result<DeliveryOutcome, DictationError> {
    host.write_clipboard(text)
        .await
        .map_err(|e| DictationError::DeliveryFailed(format!("clipboard write failed: {e:#}")))?;

    if mode == OutputMode::Clipboard {
        return Ok(DeliveryOutcome {
            paste_succeeded: None,
            degraded: false,
        });
    }

    let Some(target) = target else {
        log::warn!("insert requested without a captured target; leaving text in clipboard");
        return Ok(DeliveryOutcome {
            paste_succeeded: Some(false),
            degraded: true,
        });
    };

    match host.paste_text(text, target).await {
        Ok(()) => Ok(DeliveryOutcome {
            paste_succeeded: Some(true),
            degraded: false,
        }),
        Err(e) => {
            log::warn!("paste into {:?} failed ({e:#}); leaving text in clipboard", target.hwnd);
            Ok(DeliveryOutcome {
                paste_succeeded: Some(false),
                degraded: true,
            })
        }
    }
}
