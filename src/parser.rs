//! Section parser for model output
//!
//! The summarization model is asked to answer with tagged blocks, but models
//! drift: some reply with markdown headings, some wrap the whole answer in a
//! code fence. This module is the small, pure grammar that recovers the three
//! logical fields either way.

/// The three logical fields extracted from a summarization response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSections {
    pub observations: String,
    pub current_task: Option<String>,
    pub suggested_response: Option<String>,
}

const OBSERVATION_TAGS: &[&str] = &["observations"];
const TASK_TAGS: &[&str] = &["current_task", "current-task"];
const RESPONSE_TAGS: &[&str] = &["suggested_response", "suggested-response"];

const OBSERVATION_HEADINGS: &[&str] = &["observations", "new observations"];
const TASK_HEADINGS: &[&str] = &["current task", "task"];
const RESPONSE_HEADINGS: &[&str] = &["suggested response", "response"];

/// Parse raw model output into sections.
///
/// Returns `None` when no observations field can be found; callers treat that
/// as a failed run.
pub fn parse_sections(raw: &str) -> Option<ParsedSections> {
    let text = strip_enclosing_fence(raw);

    let observations = extract_field(text, OBSERVATION_TAGS, OBSERVATION_HEADINGS)?;
    if observations.is_empty() {
        return None;
    }

    let current_task = extract_field(text, TASK_TAGS, TASK_HEADINGS).filter(|s| !s.is_empty());
    let suggested_response =
        extract_field(text, RESPONSE_TAGS, RESPONSE_HEADINGS).filter(|s| !s.is_empty());

    Some(ParsedSections {
        observations,
        current_task,
        suggested_response,
    })
}

/// Strip a single code fence when it encloses the entire text.
fn strip_enclosing_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let Some(first_newline) = trimmed.find('\n') else {
        return trimmed;
    };
    let rest = &trimmed[first_newline + 1..];
    let Some(closing) = rest.rfind("```") else {
        return trimmed;
    };
    // Only treat it as an enclosing fence if the closing marker ends the text
    if !rest[closing + 3..].trim().is_empty() {
        return trimmed;
    }
    rest[..closing].trim()
}

/// Extract one field by tagged block first, heading fallback second.
fn extract_field(text: &str, tags: &[&str], headings: &[&str]) -> Option<String> {
    for tag in tags {
        if let Some(body) = extract_tagged_block(text, tag) {
            return Some(body);
        }
    }
    extract_heading_section(text, headings)
}

/// Find `<tag>...</tag>` case-insensitively and return the trimmed body.
fn extract_tagged_block(text: &str, tag: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let start = lower.find(&open)? + open.len();
    let end = lower[start..].find(&close)? + start;
    Some(text[start..end].trim().to_string())
}

/// Find a heading line matching one of `names` and take the text until the
/// next recognized heading or end of input.
fn extract_heading_section(text: &str, names: &[&str]) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines
        .iter()
        .position(|line| heading_name(line).is_some_and(|h| names.contains(&h.as_str())))?;

    let mut body = Vec::new();
    for line in &lines[start + 1..] {
        if heading_name(line).is_some_and(|h| is_recognized_heading(&h)) {
            break;
        }
        body.push(*line);
    }
    Some(body.join("\n").trim().to_string())
}

/// Normalize a line into a heading name, or `None` if it is not heading-like.
///
/// Accepts `## Observations`, `Observations:` and `**Observations**`.
fn heading_name(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let stripped = if let Some(rest) = trimmed.strip_prefix('#') {
        rest.trim_start_matches('#').trim()
    } else if trimmed.starts_with("**") && trimmed.ends_with("**") && trimmed.len() > 4 {
        trimmed[2..trimmed.len() - 2].trim()
    } else if trimmed.ends_with(':') && !trimmed[..trimmed.len() - 1].contains(':') {
        &trimmed[..trimmed.len() - 1]
    } else {
        return None;
    };

    let name = stripped.trim_end_matches(':').trim().to_lowercase();
    if name.is_empty() || name.split_whitespace().count() > 3 {
        return None;
    }
    Some(name)
}

fn is_recognized_heading(name: &str) -> bool {
    OBSERVATION_HEADINGS.contains(&name)
        || TASK_HEADINGS.contains(&name)
        || RESPONSE_HEADINGS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_blocks() {
        let raw = "<observations>\n- fixed the build\n</observations>\n\
                   <current_task>ship release</current_task>\n\
                   <suggested_response>Done.</suggested_response>";
        let parsed = parse_sections(raw).unwrap();
        assert_eq!(parsed.observations, "- fixed the build");
        assert_eq!(parsed.current_task.as_deref(), Some("ship release"));
        assert_eq!(parsed.suggested_response.as_deref(), Some("Done."));
    }

    #[test]
    fn test_tags_are_case_insensitive() {
        let raw = "<OBSERVATIONS>line one</OBSERVATIONS>";
        let parsed = parse_sections(raw).unwrap();
        assert_eq!(parsed.observations, "line one");
    }

    #[test]
    fn test_heading_fallback() {
        let raw = "## Observations\n- a\n- b\n\n## Current Task\nrefactor parser\n";
        let parsed = parse_sections(raw).unwrap();
        assert_eq!(parsed.observations, "- a\n- b");
        assert_eq!(parsed.current_task.as_deref(), Some("refactor parser"));
        assert!(parsed.suggested_response.is_none());
    }

    #[test]
    fn test_colon_headings() {
        let raw = "Observations:\n- did the thing\nCurrent task:\nfinish tests";
        let parsed = parse_sections(raw).unwrap();
        assert_eq!(parsed.observations, "- did the thing");
        assert_eq!(parsed.current_task.as_deref(), Some("finish tests"));
    }

    #[test]
    fn test_enclosing_fence_stripped() {
        let raw = "```\n<observations>- x</observations>\n```";
        let parsed = parse_sections(raw).unwrap();
        assert_eq!(parsed.observations, "- x");
    }

    #[test]
    fn test_inner_fence_preserved() {
        let raw = "<observations>```rust\nfn x() {}\n```</observations>";
        let parsed = parse_sections(raw).unwrap();
        assert!(parsed.observations.contains("fn x()"));
    }

    #[test]
    fn test_missing_observations_fails() {
        assert!(parse_sections("<current_task>foo</current_task>").is_none());
        assert!(parse_sections("just prose, no sections").is_none());
        assert!(parse_sections("<observations>  </observations>").is_none());
    }
}
