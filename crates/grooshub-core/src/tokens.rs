use crate::model::ChatMessage;

/// Per-message overhead for role markers and separators.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate token count using byte length / 4 heuristic.
/// Note: uses byte length, not character count, so it overestimates for non-ASCII text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for one chat message including role overhead.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    estimate_tokens(&message.content) + MESSAGE_OVERHEAD_TOKENS
}

pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Cut `text` so that `estimate_tokens` of the result is at most `max_tokens`.
/// Cuts on a char boundary and prefers the last whitespace before the limit.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_bytes = max_tokens.saturating_mul(4);
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let cut = &text[..end];
    match cut.rfind(char::is_whitespace) {
        Some(ws) if ws > end / 2 => cut[..ws].trim_end(),
        _ => cut,
    }
}
