//! Reflector pipeline
//!
//! Destructively recompresses the whole observation log: whatever the model
//! omits is gone for good, so the prompt leans hard on preservation. The
//! target reduction band is an instruction to the model, never enforced
//! programmatically.

use crate::observer::truncate_to_chars;

/// Marker appended when the observation log is cut at the character cap
pub const TRUNCATION_MARKER: &str = "\n... [observations truncated]";

/// How hard the reflector should compress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggressiveness {
    /// Target roughly a 20-40% size reduction
    #[default]
    Moderate,
    /// Target roughly a 40-60% size reduction
    Aggressive,
}

impl Aggressiveness {
    fn instruction(self) -> &'static str {
        match self {
            Aggressiveness::Moderate => {
                "Target a 20-40% size reduction. Merge near-duplicates and tighten wording."
            }
            Aggressiveness::Aggressive => {
                "Target a 40-60% size reduction. Merge related observations into single dense \
                 lines and drop anything that no longer matters."
            }
        }
    }
}

/// Fixed reflector instructions. The replacement is destructive, so
/// preservation requirements come first.
pub const REFLECTOR_PROMPT: &str = r#"You are rewriting the entire memory of a coding session into a denser form. Your output REPLACES the current memory completely - anything you leave out is permanently lost.

You MUST preserve:
- Every decision and its outcome
- Every constraint, preference, and fact the user stated
- Every unresolved blocker
- Exact technical identifiers: file paths, function names, flags, versions, error messages
- The "★" marker on critical lines

Compress older material more than recent material; the lines near the end are the most recent and should change the least.

Answer in exactly this format:

<observations>
one observation per line, oldest first
</observations>
<current_task>one line (omit the tag if unchanged)</current_task>
<suggested_response>omit the tag unless something specific should be said next</suggested_response>"#;

/// Assemble the reflector prompt over the (truncated) observation log.
pub fn build_reflector_prompt(
    observations: &str,
    aggressiveness: Aggressiveness,
    max_chars: usize,
) -> String {
    let observations = truncate_to_chars(observations, max_chars, TRUNCATION_MARKER);
    format!(
        "{REFLECTOR_PROMPT}\n\n{}\n\n=== CURRENT MEMORY ===\n{observations}",
        aggressiveness.instruction()
    )
}
