use serde::Serialize;
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::crypto::Encryptor;
use crate::error::Result;
use crate::model::{ChatMessage, ChatSummary};
use crate::project_memory::{self, ProjectMemoryStore};
use crate::storage::StorageBackend;
use crate::summaries::SummaryStore;
use crate::tokens::{estimate_message_tokens, estimate_tokens};
use crate::user_memory::{self, UserMemoryStore};

/// Per-summary overhead for the range header.
const SUMMARY_OVERHEAD_TOKENS: usize = 8;

#[derive(Debug, Clone)]
pub struct ChatContextRequest {
    pub chat_id: Uuid,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub token_budget: usize,
}

/// Everything the chat handler needs to call the model: memory blocks and
/// summaries for the system prompt, plus the unsummarized tail of the chat.
#[derive(Debug, Serialize)]
pub struct ChatContext {
    pub chat_id: Uuid,
    pub user_memory: Option<String>,
    pub project_memory: Option<String>,
    /// Oldest first.
    pub summaries: Vec<ChatSummary>,
    /// Unsummarized messages, oldest first.
    pub messages: Vec<ChatMessage>,
    pub total_tokens: usize,
    pub budget: usize,
    pub dropped_summaries: usize,
    pub dropped_messages: usize,
}

fn summary_tokens(summary: &ChatSummary) -> usize {
    estimate_tokens(&summary.summary) + SUMMARY_OVERHEAD_TOKENS
}

/// Assemble prompt context for a chat within `request.token_budget`.
///
/// Memory blocks are packed first, then the newest unsummarized messages,
/// then summaries from newest to oldest. Packing stops at the first item that
/// does not fit so the kept messages and summaries stay contiguous. Once an
/// unsummarized message is dropped no summary is added, since it would sit
/// on the far side of the gap.
pub async fn build_chat_context(
    storage: &impl StorageBackend,
    encryptor: &Encryptor,
    request: ChatContextRequest,
) -> Result<ChatContext> {
    let memory_config = MemoryConfig::default();
    let mut remaining = request.token_budget;
    let mut fits = |cost: usize| -> bool {
        if cost > remaining {
            return false;
        }
        remaining -= cost;
        true
    };

    let mut user_block = None;
    if let Some(user_id) = &request.user_id {
        let users = UserMemoryStore::new(storage, encryptor, &memory_config);
        if let Some(memory) = users.get(user_id).await? {
            let block = user_memory::format_for_prompt(&memory);
            if !block.is_empty() && fits(estimate_tokens(&block)) {
                user_block = Some(block);
            }
        }
    }

    let mut project_block = None;
    if let Some(project_id) = &request.project_id {
        let projects = ProjectMemoryStore::new(storage, encryptor, &memory_config);
        if let Some(memory) = projects.get(project_id).await? {
            let block = project_memory::format_for_prompt(&memory);
            if !block.is_empty() && fits(estimate_tokens(&block)) {
                project_block = Some(block);
            }
        }
    }

    let summaries = SummaryStore::new(storage, encryptor)
        .list_summaries(request.chat_id)
        .await?;
    let first_unsummarized = summaries.last().map_or(0, |s| s.end_index + 1);
    let messages = storage
        .get_messages(request.chat_id, first_unsummarized)
        .await?;

    let total_messages = messages.len();
    let mut kept_messages: Vec<ChatMessage> = messages
        .into_iter()
        .rev()
        .take_while(|m| fits(estimate_message_tokens(m)))
        .collect();
    kept_messages.reverse();

    let dropped_messages = total_messages - kept_messages.len();
    let total_summaries = summaries.len();
    let mut kept_summaries: Vec<ChatSummary> = if dropped_messages > 0 {
        Vec::new()
    } else {
        summaries
            .into_iter()
            .rev()
            .take_while(|s| fits(summary_tokens(s)))
            .collect()
    };
    kept_summaries.reverse();

    let dropped_summaries = total_summaries - kept_summaries.len();
    if dropped_messages + dropped_summaries > 0 {
        tracing::debug!(
            chat_id = %request.chat_id,
            dropped_messages,
            dropped_summaries,
            budget = request.token_budget,
            "context over budget"
        );
    }

    Ok(ChatContext {
        chat_id: request.chat_id,
        user_memory: user_block,
        project_memory: project_block,
        summaries: kept_summaries,
        messages: kept_messages,
        total_tokens: request.token_budget - remaining,
        budget: request.token_budget,
        dropped_summaries,
        dropped_messages,
    })
}

/// Render the system-prompt part of a context: memory blocks and summaries.
/// Messages are sent to the model as chat turns, not here.
pub fn format_system_context(ctx: &ChatContext) -> String {
    let mut sections = Vec::new();
    if let Some(block) = &ctx.user_memory {
        sections.push(block.trim_end().to_string());
    }
    if let Some(block) = &ctx.project_memory {
        sections.push(block.trim_end().to_string());
    }
    if !ctx.summaries.is_empty() {
        let mut out = String::from("## Earlier in this conversation\n");
        for (i, summary) in ctx.summaries.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!(
                "Messages {}-{}:\n{}\n",
                summary.start_index,
                summary.end_index,
                summary.summary.trim()
            ));
        }
        sections.push(out.trim_end().to_string());
    }
    sections.join("\n\n")
}
