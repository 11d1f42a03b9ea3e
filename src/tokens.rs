//! Heuristic token estimation
//!
//! Model-aware but deliberately cheap: the engine never calls a real
//! tokenizer. Two candidates are computed (character ratio vs lexical word
//! count) and the larger one wins, so dense prose and symbol-heavy code both
//! get a conservative estimate.

/// Characters per token for OpenAI-family models (gpt/o-series/codex)
const CHARS_PER_TOKEN_OPENAI: f64 = 4.0;
/// Characters per token for Anthropic models
const CHARS_PER_TOKEN_CLAUDE: f64 = 3.6;
/// Characters per token for Gemini models
const CHARS_PER_TOKEN_GEMINI: f64 = 4.2;
/// Fallback ratio when the model family is unknown
const CHARS_PER_TOKEN_DEFAULT: f64 = 4.0;

/// Lexical words map to slightly less than one token each
const TOKENS_PER_WORD: f64 = 0.75;

/// Estimate the token count of `text` for an optional model hint.
///
/// Pure and deterministic. Empty text yields 0; any non-empty text yields
/// at least 1.
pub fn estimate_tokens(text: &str, model_hint: Option<&str>) -> usize {
    if text.is_empty() {
        return 0;
    }

    let ratio = chars_per_token(model_hint);
    let by_chars = text.chars().count() as f64 / ratio;
    let by_words = lexical_count(text) as f64 * TOKENS_PER_WORD;

    (by_chars.max(by_words).ceil() as usize).max(1)
}

/// Resolve the characters-per-token ratio from a model identifier.
fn chars_per_token(model_hint: Option<&str>) -> f64 {
    let Some(hint) = model_hint else {
        return CHARS_PER_TOKEN_DEFAULT;
    };
    let hint = hint.to_lowercase();

    if hint.contains("claude") {
        CHARS_PER_TOKEN_CLAUDE
    } else if hint.contains("gemini") {
        CHARS_PER_TOKEN_GEMINI
    } else if hint.contains("gpt") || hint.contains("codex") || hint.starts_with('o') {
        CHARS_PER_TOKEN_OPENAI
    } else {
        CHARS_PER_TOKEN_DEFAULT
    }
}

/// Count lexical tokens: runs of `[A-Za-z0-9_]` count as one, every other
/// non-whitespace character counts on its own.
fn lexical_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
            if !c.is_whitespace() {
                count += 1;
            }
        }
    }
    count
}
