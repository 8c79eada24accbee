use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A compressed stand-in for the messages `start_index..=end_index` of a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub org_id: String,
    pub start_index: usize,
    pub end_index: usize,
    pub summary: String,
    pub original_tokens: usize,
    pub summary_tokens: usize,
    /// `original_tokens / summary_tokens`; 8.0 means the summary is 8x smaller.
    pub compression_ratio: f32,
    /// Whether the row was stored as ciphertext.
    pub encrypted: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatSummary {
    pub fn message_count(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    pub fn covers(&self, index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&index)
    }
}

/// Input for [`crate::summaries::SummaryStore::create_summary`].
#[derive(Debug, Clone)]
pub struct NewSummary {
    pub chat_id: Uuid,
    pub org_id: String,
    pub start_index: usize,
    pub end_index: usize,
    pub summary: String,
    /// Estimated tokens of the replaced messages.
    pub original_tokens: usize,
}

/// Compression ratio of a summary. Zero when either side is empty.
pub fn compression_ratio(original_tokens: usize, summary_tokens: usize) -> f32 {
    if original_tokens == 0 || summary_tokens == 0 {
        return 0.0;
    }
    original_tokens as f32 / summary_tokens as f32
}

/// Aggregate summary bookkeeping for one chat.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryStats {
    pub summary_count: usize,
    pub messages_summarized: usize,
    pub original_tokens: usize,
    pub summary_tokens: usize,
    pub overall_ratio: f32,
    pub last_summarized_index: Option<usize>,
}

impl SummaryStats {
    pub fn from_summaries(summaries: &[ChatSummary]) -> Self {
        Self::from_ranges(summaries.iter().map(|s| {
            (s.start_index, s.end_index, s.original_tokens, s.summary_tokens)
        }))
    }

    /// Build stats from `(start_index, end_index, original_tokens, summary_tokens)`
    /// tuples, so callers need not decrypt summary text.
    pub fn from_ranges(ranges: impl IntoIterator<Item = (usize, usize, usize, usize)>) -> Self {
        let mut stats = Self::default();
        for (start, end, original, summary) in ranges {
            stats.summary_count += 1;
            stats.messages_summarized += end.saturating_sub(start) + 1;
            stats.original_tokens += original;
            stats.summary_tokens += summary;
            stats.last_summarized_index = stats.last_summarized_index.max(Some(end));
        }
        stats.overall_ratio = compression_ratio(stats.original_tokens, stats.summary_tokens);
        stats
    }
}
