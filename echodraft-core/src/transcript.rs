/// Reconciles the live transcript accumulated during a streaming session with
/// the termination text returned by the stop call.
///
/// Providers can return a superior final pass on stop, but sometimes a
/// degraded one; never blindly prefer either source. Longer (trimmed) text
/// wins; ties go to the termination text since it is the provider's final
/// pass.
pub fn reconcile_final_text(live: &str, termination: &str) -> String {
    let live = live.trim();
    let termination = termination.trim();

    if live.chars().count() > termination.chars().count() {
        live.to_string()
    } else {
        termination.to_string()
    }
}

/// Accepts a transcript override only if it carries non-whitespace content.
pub fn accept_transcript_override(text: String) -> Option<String> {
    if text.trim().is_empty() { None } else { Some(text) }
}

pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

pub fn char_count(text: &str) -> u64 {
    text.chars().count() as u64
}
