//! Usage estimation for authorization sizing.
//!
//! Pure functions that convert a request (prompt text or message list,
//! reasoning effort) into predicted resource amounts. The numbers are
//! conservative upper bounds used to size the ledger authorization; actual
//! settlement always uses the smaller of (predicted, actual-from-upstream).

use crate::upstream::types::{ChatMessage, ContentPart, MessageContent, ReasoningEffort};

/// Characters-per-token approximation used across all estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate input tokens for a plain prompt string: `ceil(len / 4)`.
pub fn estimate_input_tokens(text: &str) -> u64 {
    (text.len().div_ceil(CHARS_PER_TOKEN)) as u64
}

/// Estimate input tokens for a message list.
///
/// Sums only text content across all messages: plain string content counts
/// as one text chunk, image chunks contribute 0 characters.
pub fn estimate_input_tokens_from_messages(messages: &[ChatMessage]) -> u64 {
    let chars: usize = messages
        .iter()
        .map(|msg| match &msg.content {
            MessageContent::Text(text) => text.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::ImageUrl { .. } => 0,
                })
                .sum(),
        })
        .sum();

    (chars.div_ceil(CHARS_PER_TOKEN)) as u64
}

/// Search-query budget for a deep-research request.
///
/// A coarse cap keyed off reasoning effort, not a prediction. Settlement
/// clamps the actual query count to this amount, so it is never exceeded.
pub fn estimate_search_queries(effort: Option<ReasoningEffort>) -> u64 {
    match effort.unwrap_or_default() {
        ReasoningEffort::Low => 10,
        ReasoningEffort::Medium => 30,
        ReasoningEffort::High => 60,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
