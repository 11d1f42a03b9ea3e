//! Observer pipeline
//!
//! Turns buffered transcript segments plus the prior observation log into
//! new observation lines via one external summarization call. The merge is
//! strictly additive: existing lines survive in order, new lines append, and
//! only the configured number of most recent lines is retained.

/// Marker appended when the transcript is cut at the character cap
pub const TRUNCATION_MARKER: &str = "\n... [transcript truncated]";

/// Extraction instructions sent ahead of every observer transcript.
pub const OBSERVER_PROMPT: &str = r#"You are maintaining the durable memory of a coding session. Extract new observations from the transcript below.

Record, one line each:
- Decisions made and their outcomes
- Constraints, preferences, and facts the user stated
- Blockers hit and how they were resolved
- Exact technical identifiers: file paths, function names, flags, versions, error messages

Rules:
- One atomic observation per line, most important first within this batch
- Prefix critical lines with the marker "★" and notable lines with "◆"
- Do NOT repeat anything already present in the prior observations
- Skip pleasantries, progress narration, and anything derivable from the code itself

Answer in exactly this format:

<observations>
one observation per line
</observations>
<current_task>what the session is working on right now, one line (omit the tag if unchanged)</current_task>
<suggested_response>optional short guidance for the next reply (omit the tag if none)</suggested_response>"#;

/// Cut `text` to at most `max_chars` characters, appending a marker when cut.
pub fn truncate_to_chars(text: &str, max_chars: usize, marker: &str) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(marker);
    cut
}

/// Assemble the single observer prompt: instructions, prior observations
/// (for dedup), then the truncated transcript.
pub fn build_observer_prompt(prior_observations: &str, transcript: &str, max_chars: usize) -> String {
    let transcript = truncate_to_chars(transcript, max_chars, TRUNCATION_MARKER);

    let prior_block = if prior_observations.trim().is_empty() {
        "(none yet)".to_string()
    } else {
        prior_observations.trim().to_string()
    };

    format!(
        "{OBSERVER_PROMPT}\n\n=== PRIOR OBSERVATIONS (do not repeat) ===\n{prior_block}\n\n=== TRANSCRIPT ===\n{transcript}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncation_appends_marker() {
        let long = "x".repeat(100);
        let cut = truncate_to_chars(&long, 10, TRUNCATION_MARKER);
        assert!(cut.starts_with("xxxxxxxxxx"));
        assert!(cut.ends_with("[transcript truncated]"));
    }

    #[test]
    fn test_short_text_not_marked() {
        let text = "short";
        assert_eq!(truncate_to_chars(text, 100, TRUNCATION_MARKER), "short");
    }

    #[test]
    fn test_prompt_contains_all_parts() {
        let prompt = build_observer_prompt("★ old fact", "[user] hello", 1000);
        assert!(prompt.contains("★ old fact"));
        assert!(prompt.contains("[user] hello"));
        assert!(prompt.contains("<observations>"));
    }

    #[test]
    fn test_empty_prior_observations_placeholder() {
        let prompt = build_observer_prompt("", "transcript", 1000);
        assert!(prompt.contains("(none yet)"));
    }
}
