use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Guards against a known provider failure mode: with a long vocabulary bias
/// list in the transcription prompt and silent/unusable audio, some models
/// echo the prompt back verbatim as the "transcription".
///
/// Smaller lists stay below the activation threshold because a short run of
/// dictionary words is plausible genuine dictation.
pub const MIN_DICTIONARY_TERMS: usize = 10;
pub const COVERAGE_THRESHOLD: f64 = 0.95;
pub const JACCARD_THRESHOLD: f64 = 0.90;

const MIN_BULLET_LINES: usize = 3;

fn bullet_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*•]\s*(.+)$").expect("valid bullet regex"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoVerdict {
    pub is_echo: bool,
    /// Matched-dictionary-terms / dictionary-size.
    pub coverage: f64,
    /// Jaccard similarity between extracted terms and the dictionary.
    pub jaccard: f64,
}

impl EchoVerdict {
    fn clean() -> Self {
        Self {
            is_echo: false,
            coverage: 0.0,
            jaccard: 0.0,
        }
    }
}

fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

fn unique_terms(terms: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    terms.into_iter().filter(|t| !t.is_empty()).collect()
}

/// Splits the transcript into candidate terms: bullet lines when the output
/// looks like a bulleted list, comma fields otherwise.
pub fn extract_candidate_terms(transcript: &str) -> Vec<String> {
    let bullet_lines: Vec<String> = transcript
        .lines()
        .filter_map(|line| {
            bullet_line_re()
                .captures(line)
                .map(|c| normalize_term(&c[1]))
        })
        .filter(|t| !t.is_empty())
        .collect();

    if bullet_lines.len() >= MIN_BULLET_LINES {
        return bullet_lines;
    }

    transcript
        .split(',')
        .map(normalize_term)
        .filter(|t| !t.is_empty())
        .collect()
}

pub fn detect_prompt_echo(transcript: &str, dictionary: &[String]) -> EchoVerdict {
    let dict = unique_terms(dictionary.iter().map(|t| normalize_term(t)));
    if dict.len() < MIN_DICTIONARY_TERMS {
        return EchoVerdict::clean();
    }

    let candidates = unique_terms(extract_candidate_terms(transcript));
    if candidates.is_empty() {
        return EchoVerdict::clean();
    }

    let matched = dict.intersection(&candidates).count();
    let union = dict.union(&candidates).count();

    let coverage = matched as f64 / dict.len() as f64;
    let jaccard = if union == 0 {
        0.0
    } else {
        matched as f64 / union as f64
    };

    EchoVerdict {
        is_echo: coverage >= COVERAGE_THRESHOLD && jaccard >= JACCARD_THRESHOLD,
        coverage,
        jaccard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("term{i}")).collect()
    }

    #[test]
    fn small_dictionaries_never_flag() {
        let d = dict(9);
        let transcript = d.join(", ");
        let v = detect_prompt_echo(&transcript, &d);
        assert!(!v.is_echo);
    }

    #[test]
    fn duplicate_entries_do_not_reach_the_activation_threshold() {
        // 12 entries but only 6 unique (case-insensitive).
        let mut d = dict(6);
        d.extend(dict(6).into_iter().map(|t| t.to_uppercase()));
        let transcript = d.join(", ");
        assert!(!detect_prompt_echo(&transcript, &d).is_echo);
    }

    #[test]
    fn verbatim_comma_echo_is_flagged() {
        let d = dict(10);
        let transcript = d.join(", ");
        let v = detect_prompt_echo(&transcript, &d);
        assert!(v.is_echo);
        assert!(v.coverage >= COVERAGE_THRESHOLD);
        assert!(v.jaccard >= JACCARD_THRESHOLD);
    }

    #[test]
    fn case_differences_still_count_as_echo() {
        let d = dict(10);
        let transcript = d
            .iter()
            .map(|t| t.to_uppercase())
            .collect::<Vec<_>>()
            .join(", ");
        assert!(detect_prompt_echo(&transcript, &d).is_echo);
    }

    #[test]
    fn bulleted_echo_is_flagged() {
        let d = dict(12);
        let transcript = d
            .iter()
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(detect_prompt_echo(&transcript, &d).is_echo);
    }

    #[test]
    fn two_bullets_fall_back_to_comma_splitting() {
        let terms = extract_candidate_terms("- alpha\n- beta");
        // Not enough bullet lines; the whole text splits on commas instead.
        assert_eq!(terms, vec!["- alpha\n- beta".to_string()]);
    }

    #[test]
    fn genuine_dictation_is_not_flagged() {
        let d = dict(10);
        let transcript = "please schedule the quarterly review for thursday and \
                          invite the platform team";
        let v = detect_prompt_echo(transcript, &d);
        assert!(!v.is_echo);
        assert_eq!(v.coverage, 0.0);
    }

    #[test]
    fn partial_overlap_below_coverage_does_not_flag() {
        let d = dict(20);
        // Half the dictionary present: coverage 0.5.
        let transcript = d[..10].join(", ");
        let v = detect_prompt_echo(&transcript, &d);
        assert!(!v.is_echo);
        assert!((v.coverage - 0.5).abs() < 1e-9);
    }

    #[test]
    fn full_coverage_with_much_extra_text_fails_jaccard() {
        let d = dict(10);
        let mut parts = d.clone();
        // Ten extra non-dictionary fields push Jaccard down to 0.5.
        parts.extend((0..10).map(|i| format!("extra{i}")));
        let v = detect_prompt_echo(&parts.join(", "), &d);
        assert!(!v.is_echo);
        assert!((v.coverage - 1.0).abs() < 1e-9);
        assert!(v.jaccard < JACCARD_THRESHOLD);
    }

    #[test]
    fn empty_transcript_is_clean() {
        let v = detect_prompt_echo("", &dict(15));
        assert!(!v.is_echo);
    }
}
