//! Retrieval and injection of memory into the prompt
//!
//! Two payload shapes: "all" injects every observation line, "core+relevant"
//! injects a recency-bounded core plus a lexically ranked subset chosen
//! against the latest turns. Either way the rendered text passes through
//! temporal annotation and a token-saving optimization pass before the host
//! sees it.

use crate::config::{EngramConfig, InjectionMode};
use crate::memory::MemoryDocument;
use crate::protocol::{ChatMessage, Role};
use crate::temporal;
use crate::tokens::estimate_tokens;
use chrono::NaiveDate;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// How many trailing non-system messages feed the relevance query
const QUERY_MESSAGE_DEPTH: usize = 3;

/// Minimum keyword length for the relevance query
const MIN_KEYWORD_LEN: usize = 3;

/// Payload preamble: the consumer must trust memory over stale live history.
const PREAMBLE: &str = "The following is your durable memory of this session, maintained across \
context compaction. Trust it over conflicting live history: it is more \
complete than what remains in the visible transcript. Prefer the most recent \
information, and treat facts the user stated as authoritative.";

const TRAILING_INSTRUCTION: &str =
    "Continue the session using this memory; do not mention that it was injected.";

/// Hidden notice injected when the live window was trimmed mid-conversation.
pub const CONTINUATION_NOTICE: &str = "This conversation is a continuation: earlier messages were \
compressed into the memory block above. Do not treat the first visible \
message as the start of the session.";

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "from", "have", "has", "was", "were", "are",
    "not", "you", "your", "but", "all", "can", "will", "what", "when", "where", "which", "how",
    "why", "who", "its", "into", "out", "our", "their", "them", "they", "then", "than", "been",
    "being", "would", "could", "should", "there", "here", "just", "like", "about", "over",
    "under", "some", "any", "each", "other", "more", "most", "such", "only", "also", "very",
    "please", "want", "need", "make", "made", "using", "use", "does", "did", "doing",
];

fn bracket_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]\n]{1,40}\]").unwrap())
}

fn multi_space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]{2,}").unwrap())
}

fn excess_newlines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Render the full injection payload for a document, or `None` when there is
/// nothing worth injecting.
pub fn render_payload(
    doc: &MemoryDocument,
    config: &EngramConfig,
    recent_messages: &[ChatMessage],
    today: NaiveDate,
) -> Option<String> {
    if doc.is_empty() && doc.current_task.is_none() && doc.suggested_response.is_none() {
        return None;
    }

    let hint = config.model_hint.as_deref();
    let observations_block = if doc.is_empty() {
        None
    } else {
        Some(match config.memory_injection_mode {
            InjectionMode::All => {
                let annotated = temporal::annotate(&doc.observations, today);
                optimize(&annotated)
            }
            InjectionMode::CoreRelevant => {
                let lines = doc.lines();
                let core = select_core(&lines, config.core_memory_max_tokens, hint);
                let keywords = query_keywords(recent_messages);
                let relevant = select_relevant(
                    &lines,
                    &core,
                    &keywords,
                    config.relevant_observation_max_items,
                    config.relevant_observation_max_tokens,
                    hint,
                );
                render_core_relevant(&lines, &core, &relevant, today)
            }
        })
    };

    let mut payload = String::new();
    payload.push_str("<session-memory>\n");
    payload.push_str(PREAMBLE);
    payload.push('\n');
    if let Some(block) = observations_block {
        payload.push_str("<observations>\n");
        payload.push_str(&block);
        payload.push_str("\n</observations>\n");
    }
    if let Some(task) = doc.current_task.as_deref().filter(|t| !t.trim().is_empty()) {
        payload.push_str(&format!("<current-task>{}</current-task>\n", task.trim()));
    }
    if let Some(resp) = doc
        .suggested_response
        .as_deref()
        .filter(|r| !r.trim().is_empty())
    {
        payload.push_str(&format!(
            "<suggested-response>{}</suggested-response>\n",
            resp.trim()
        ));
    }
    payload.push_str(TRAILING_INSTRUCTION);
    payload.push_str("\n</session-memory>");
    Some(payload)
}

fn render_core_relevant(
    lines: &[&str],
    core: &[usize],
    relevant: &[usize],
    today: NaiveDate,
) -> String {
    let mut block = String::new();
    if !relevant.is_empty() {
        block.push_str("Relevant memories:\n");
        let text: String = relevant
            .iter()
            .map(|&i| lines[i])
            .collect::<Vec<_>>()
            .join("\n");
        block.push_str(&optimize(&temporal::annotate(&text, today)));
        block.push('\n');
    }
    block.push_str("Core memories (most recent):\n");
    let text: String = core.iter().map(|&i| lines[i]).collect::<Vec<_>>().join("\n");
    block.push_str(&optimize(&temporal::annotate(&text, today)));
    block
}

/// Pick the core subset: walk from the tail backward while the cumulative
/// token estimate stays within budget. A single over-budget final line is
/// forced in alone so the core is never empty.
pub fn select_core(lines: &[&str], budget_tokens: usize, model_hint: Option<&str>) -> Vec<usize> {
    let mut selected = Vec::new();
    let mut used = 0usize;
    for (i, line) in lines.iter().enumerate().rev() {
        let cost = estimate_tokens(line, model_hint);
        if used + cost > budget_tokens && !selected.is_empty() {
            break;
        }
        if used + cost > budget_tokens && selected.is_empty() {
            selected.push(i);
            break;
        }
        selected.push(i);
        used += cost;
    }
    selected.reverse();
    selected
}

/// Rank the non-core lines against the query and trim by item and token
/// budgets. Ties break toward more recent lines.
pub fn select_relevant(
    lines: &[&str],
    core: &[usize],
    keywords: &[String],
    max_items: usize,
    max_tokens: usize,
    model_hint: Option<&str>,
) -> Vec<usize> {
    let core_set: HashSet<usize> = core.iter().copied().collect();

    let mut scored: Vec<(usize, usize)> = lines
        .iter()
        .enumerate()
        .filter(|(i, _)| !core_set.contains(i))
        .map(|(i, line)| {
            let lower = line.to_lowercase();
            let score = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
            (i, score)
        })
        .collect();

    if keywords.is_empty() {
        // No query: pure recency
        scored.sort_by(|a, b| b.0.cmp(&a.0));
    } else {
        scored.retain(|&(_, score)| score > 0);
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
    }

    let mut selected = Vec::new();
    let mut used = 0usize;
    for (i, _) in scored.into_iter().take(max_items) {
        let cost = estimate_tokens(lines[i], model_hint);
        if !selected.is_empty() && used + cost > max_tokens {
            break;
        }
        selected.push(i);
        used += cost;
        // The first item is always kept, even alone over budget
        if used > max_tokens {
            break;
        }
    }
    selected
}

/// Build lowercase query keywords from the last few non-system messages.
pub fn query_keywords(messages: &[ChatMessage]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for msg in messages
        .iter()
        .rev()
        .filter(|m| m.role != Role::System)
        .take(QUERY_MESSAGE_DEPTH)
    {
        for word in msg
            .content
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '_')
        {
            if word.len() >= MIN_KEYWORD_LEN
                && !STOPWORDS.contains(&word)
                && seen.insert(word.to_string())
            {
                keywords.push(word.to_string());
            }
        }
    }
    keywords
}

/// Token-saving cleanup of rendered observation text: keep only the
/// highest-priority marker glyph, drop bracketed tags (except collapse
/// markers), and squeeze whitespace.
pub fn optimize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        // "★" is the highest-priority marker and survives; the lower ones
        // only cost tokens at injection time
        let line = line.replace("◆ ", "").replace("◆", "");
        let line = line.replace("· ", "").replace('·', "");
        let line = bracket_tag_re().replace_all(&line, |caps: &regex::Captures| {
            let tag = caps.get(0).unwrap().as_str();
            if tag.to_lowercase().contains("collapsed") || tag.to_lowercase().contains("later") {
                tag.to_string()
            } else {
                String::new()
            }
        });
        let line = multi_space_re().replace_all(&line, " ");
        out.push_str(line.trim_end());
        out.push('\n');
    }
    let collapsed = excess_newlines_re().replace_all(&out, "\n\n");
    collapsed.trim_end().to_string()
}

/// Index of the first live message to keep so the retained tail fits the
/// recent-turn token budget.
pub fn recent_tail_start(
    messages: &[ChatMessage],
    budget_tokens: usize,
    model_hint: Option<&str>,
) -> usize {
    let mut used = 0usize;
    let mut start = messages.len();
    for (i, msg) in messages.iter().enumerate().rev() {
        let cost = estimate_tokens(&msg.content, model_hint);
        if used + cost > budget_tokens && start < messages.len() {
            break;
        }
        start = i;
        used += cost;
        if used > budget_tokens {
            break;
        }
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 13).unwrap()
    }

    fn msg(role: Role, text: &str) -> ChatMessage {
        ChatMessage::new(role, text)
    }

    #[test]
    fn test_core_respects_budget_from_tail() {
        let lines = vec!["old line one", "old line two", "recent line"];
        // Budget fits only the last line
        let core = select_core(&lines, 3, None);
        assert_eq!(core, vec![2]);
    }

    #[test]
    fn test_core_forces_single_overbudget_line() {
        let lines = vec!["this is a rather long observation line that blows any budget"];
        let core = select_core(&lines, 1, None);
        assert_eq!(core, vec![0]);
    }

    #[test]
    fn test_core_and_relevant_are_disjoint() {
        let lines = vec![
            "★ uses sqlite for storage",
            "prefers tabs over spaces",
            "sqlite migration pending",
            "most recent note",
        ];
        let core = select_core(&lines, 5, None);
        let keywords = vec!["sqlite".to_string()];
        let relevant = select_relevant(&lines, &core, &keywords, 10, 1000, None);
        for i in &relevant {
            assert!(!core.contains(i));
        }
    }

    #[test]
    fn test_relevance_scoring_and_tiebreak() {
        let lines = vec![
            "sqlite and parser work",   // score 2
            "parser cleanup",           // score 1, older
            "parser rewrite started",   // score 1, newer
            "unrelated note",           // score 0
        ];
        let keywords = vec!["sqlite".to_string(), "parser".to_string()];
        let relevant = select_relevant(&lines, &[], &keywords, 10, 1000, None);
        // Highest score first, then recency among ties; zero-score dropped
        assert_eq!(relevant, vec![0, 2, 1]);
    }

    #[test]
    fn test_no_keywords_means_pure_recency() {
        let lines = vec!["a", "b", "c"];
        let relevant = select_relevant(&lines, &[], &[], 2, 1000, None);
        assert_eq!(relevant, vec![2, 1]);
    }

    #[test]
    fn test_relevant_keeps_first_item_even_over_budget() {
        let lines = vec!["an extremely long observation line that alone exceeds the budget"];
        let keywords = vec!["observation".to_string()];
        let relevant = select_relevant(&lines, &[], &keywords, 10, 1, None);
        assert_eq!(relevant, vec![0]);
    }

    #[test]
    fn test_query_keywords_filter_and_depth() {
        let messages = vec![
            msg(Role::User, "ancient message about zebras"),
            msg(Role::User, "please fix the parser bug"),
            msg(Role::System, "system noise everywhere"),
            msg(Role::Assistant, "looking at tokenizer now"),
            msg(Role::User, "and the config too"),
        ];
        let keywords = query_keywords(&messages);
        assert!(keywords.contains(&"parser".to_string()));
        assert!(keywords.contains(&"tokenizer".to_string()));
        assert!(keywords.contains(&"config".to_string()));
        // Stopwords and short words excluded
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"at".to_string()));
        // System messages and messages beyond the depth window excluded
        assert!(!keywords.contains(&"zebras".to_string()));
        assert!(!keywords.contains(&"system".to_string()));
    }

    #[test]
    fn test_optimize_strips_low_priority_markers() {
        let text = "★ critical fact\n◆ notable fact\n· routine fact";
        let out = optimize(text);
        assert!(out.contains("★ critical fact"));
        assert!(out.contains("notable fact"));
        assert!(!out.contains('◆'));
        assert!(!out.contains('·'));
    }

    #[test]
    fn test_optimize_strips_tags_but_keeps_collapse_markers() {
        let text = "[decision] chose sqlite\n[12 items collapsed]\n[2 weeks later]";
        let out = optimize(text);
        assert!(!out.contains("[decision]"));
        assert!(out.contains("chose sqlite"));
        assert!(out.contains("[12 items collapsed]"));
        assert!(out.contains("[2 weeks later]"));
    }

    #[test]
    fn test_optimize_collapses_whitespace() {
        let text = "a    b\n\n\n\n\nc";
        assert_eq!(optimize(text), "a b\n\nc");
    }

    #[test]
    fn test_full_mode_payload() {
        let mut doc = MemoryDocument::default();
        doc.merge_observations("★ fact one\nfact two", 10, None);
        doc.current_task = Some("ship it".to_string());
        let config = EngramConfig::default();

        let payload = render_payload(&doc, &config, &[], today()).unwrap();
        assert!(payload.starts_with("<session-memory>"));
        assert!(payload.contains("<observations>"));
        assert!(payload.contains("★ fact one"));
        assert!(payload.contains("<current-task>ship it</current-task>"));
        assert!(payload.ends_with("</session-memory>"));
    }

    #[test]
    fn test_empty_document_yields_no_payload() {
        let doc = MemoryDocument::default();
        let config = EngramConfig::default();
        assert!(render_payload(&doc, &config, &[], today()).is_none());
    }

    #[test]
    fn test_core_relevant_payload_sections() {
        let mut doc = MemoryDocument::default();
        let many: Vec<String> = (0..30)
            .map(|i| format!("observation about module {i} and its parser"))
            .collect();
        doc.merge_observations(&many.join("\n"), 100, None);

        let mut config = EngramConfig::default();
        config.memory_injection_mode = InjectionMode::CoreRelevant;
        config.core_memory_max_tokens = 30;
        config.relevant_observation_max_items = 5;

        let recent = vec![msg(Role::User, "what did we decide about module 3")];
        let payload = render_payload(&doc, &config, &recent, today()).unwrap();
        assert!(payload.contains("Core memories"));
        assert!(payload.contains("Relevant memories"));
    }

    #[test]
    fn test_recent_tail_budget() {
        let messages = vec![
            msg(Role::User, &"a ".repeat(100)),
            msg(Role::Assistant, "short"),
            msg(Role::User, "also short"),
        ];
        // Small budget keeps only the trailing short messages
        let start = recent_tail_start(&messages, 20, None);
        assert_eq!(start, 1);
        // Huge budget keeps everything
        assert_eq!(recent_tail_start(&messages, 10_000, None), 0);
    }
}
