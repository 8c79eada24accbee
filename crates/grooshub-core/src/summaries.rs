//! Token-bounded chat summaries with compression bookkeeping.
//!
//! The summaries of one chat tile its message history from index 0 without
//! gaps or overlaps, so everything at or below
//! [`SummaryStore::last_summarized_index`] can be replaced by summary text.

use chrono::Utc;
use uuid::Uuid;

use crate::crypto::Encryptor;
use crate::error::{GroosHubError, Result};
use crate::model::{compression_ratio, ChatSummary, NewSummary, SummaryStats};
use crate::storage::{StorageBackend, SummaryRow};
use crate::tokens::estimate_tokens;

pub struct SummaryStore<'a, S: StorageBackend> {
    storage: &'a S,
    encryptor: &'a Encryptor,
}

impl<'a, S: StorageBackend> SummaryStore<'a, S> {
    pub fn new(storage: &'a S, encryptor: &'a Encryptor) -> Self {
        Self { storage, encryptor }
    }

    /// Persist a summary of `start_index..=end_index`.
    ///
    /// The range must begin directly after the previous summary of the chat
    /// (or at 0 for the first one).
    pub async fn create_summary(&self, input: NewSummary) -> Result<ChatSummary> {
        let text = input.summary.trim();
        if text.is_empty() {
            return Err(GroosHubError::InvalidInput("summary text cannot be empty".into()));
        }
        if input.end_index < input.start_index {
            return Err(GroosHubError::InvalidInput(format!(
                "summary range {}..={} is inverted",
                input.start_index, input.end_index
            )));
        }

        let expected_start = self
            .last_summarized_index(input.chat_id)
            .await?
            .map_or(0, |end| end + 1);
        if input.start_index != expected_start {
            return Err(GroosHubError::InvalidInput(format!(
                "summary must start at message {expected_start}, got {}",
                input.start_index
            )));
        }

        let summary_tokens = estimate_tokens(text);
        let sealed = self.encryptor.seal(text, &input.org_id)?;
        let summary = ChatSummary {
            id: Uuid::now_v7(),
            chat_id: input.chat_id,
            org_id: input.org_id,
            start_index: input.start_index,
            end_index: input.end_index,
            summary: text.to_string(),
            original_tokens: input.original_tokens,
            summary_tokens,
            compression_ratio: compression_ratio(input.original_tokens, summary_tokens),
            encrypted: sealed.encrypted,
            created_at: Utc::now(),
        };

        self.storage
            .save_summary(&SummaryRow {
                id: summary.id,
                chat_id: summary.chat_id,
                org_id: summary.org_id.clone(),
                start_index: summary.start_index,
                end_index: summary.end_index,
                summary: sealed.data,
                is_encrypted: sealed.encrypted,
                original_tokens: summary.original_tokens,
                summary_tokens: summary.summary_tokens,
                compression_ratio: summary.compression_ratio,
                created_at: summary.created_at,
            })
            .await?;

        tracing::info!(
            chat_id = %summary.chat_id,
            start = summary.start_index,
            end = summary.end_index,
            original_tokens = summary.original_tokens,
            summary_tokens = summary.summary_tokens,
            ratio = summary.compression_ratio,
            encrypted = summary.encrypted,
            "stored chat summary"
        );
        Ok(summary)
    }

    /// All summaries of a chat, decrypted, ordered by `start_index`.
    pub async fn list_summaries(&self, chat_id: Uuid) -> Result<Vec<ChatSummary>> {
        let rows = self.storage.list_summaries(chat_id).await?;
        rows.into_iter().map(|row| self.open_row(row)).collect()
    }

    /// Index of the last message covered by a summary, if any.
    pub async fn last_summarized_index(&self, chat_id: Uuid) -> Result<Option<usize>> {
        let rows = self.storage.list_summaries(chat_id).await?;
        Ok(rows.iter().map(|r| r.end_index).max())
    }

    /// Aggregate bookkeeping. Works without the encryption key.
    pub async fn stats(&self, chat_id: Uuid) -> Result<SummaryStats> {
        let rows = self.storage.list_summaries(chat_id).await?;
        Ok(SummaryStats::from_ranges(rows.iter().map(|r| {
            (r.start_index, r.end_index, r.original_tokens, r.summary_tokens)
        })))
    }

    pub async fn delete_for_chat(&self, chat_id: Uuid) -> Result<usize> {
        let removed = self.storage.delete_summaries(chat_id).await?;
        if removed > 0 {
            tracing::info!(%chat_id, removed, "deleted chat summaries");
        }
        Ok(removed)
    }

    fn open_row(&self, row: SummaryRow) -> Result<ChatSummary> {
        let summary = self
            .encryptor
            .open(&row.summary, row.is_encrypted, &row.org_id)?;
        Ok(ChatSummary {
            id: row.id,
            chat_id: row.chat_id,
            org_id: row.org_id,
            start_index: row.start_index,
            end_index: row.end_index,
            summary,
            original_tokens: row.original_tokens,
            summary_tokens: row.summary_tokens,
            compression_ratio: row.compression_ratio,
            encrypted: row.is_encrypted,
            created_at: row.created_at,
        })
    }
}
