//! Detects replies where the model talks instead of acting.

/// Replies this short are accepted as answers whatever they say.
const MIN_STALL_CHARS: usize = 10;

const MANUAL_STEP_MARKERS: &[&str] = &[
    "```",
    "you should",
    "you can",
    "you need to",
    "manually",
    "try to",
    "follow these steps",
];

const ACCESS_REFUSAL_MARKERS: &[&str] = &[
    "don't have access",
    "do not have access",
    "don't have the",
    "cannot access",
    "can't access",
    "cannot find",
    "can't find",
    "not provided",
    "unavailable",
    "unable to see",
    "no mention",
];

const QUESTION_MARKERS: &[&str] = &["could you", "can you", "want me to", "please provide"];

/// Why a non-tool reply is not accepted as a final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallKind {
    /// Asks the user something
    Question,
    /// Tells the user what to do instead of doing it
    ManualSteps,
    /// Claims it cannot see or reach something it has tools for
    AccessRefusal,
}

/// Classify a reply that carries no tool call.
pub fn detect_stall(text: &str) -> Option<StallKind> {
    let text = text.trim();
    if text.chars().count() <= MIN_STALL_CHARS {
        return None;
    }
    let lower = text.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if has(ACCESS_REFUSAL_MARKERS) {
        Some(StallKind::AccessRefusal)
    } else if text.contains('?') || has(QUESTION_MARKERS) {
        Some(StallKind::Question)
    } else if has(MANUAL_STEP_MARKERS) {
        Some(StallKind::ManualSteps)
    } else {
        None
    }
}
