//! One-call conversation analysis.
//!
//! When a chat has enough unsummarized history, or the user memory is due
//! for an update, the analyzer sends a single prompt to the LLM and asks
//! for a summary, a user-memory delta and a project delta in one JSON
//! object. The response is fully parsed and validated before any store is
//! written, so a bad response leaves storage untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::config::{GroosHubConfig, MemoryConfig};
use crate::crypto::Encryptor;
use crate::error::{GroosHubError, Result};
use crate::llm::LlmService;
use crate::model::{
    ChatMessage, ChatSummary, MemoryDelta, MemoryItem, MemoryItemKind, NewSummary, ProjectDelta,
    ProjectMemory, SoftContextCategory, SoftContextEntry, UserMemory,
};
use crate::project_memory::{self, ProjectMemoryStore};
use crate::storage::StorageBackend;
use crate::summaries::SummaryStore;
use crate::tokens::{estimate_messages_tokens, estimate_tokens, truncate_to_tokens};
use crate::user_memory::{self, UserMemoryStore};

/// Per-message cap when building the transcript for the prompt.
const MAX_TOKENS_PER_MESSAGE: usize = 1_000;
/// Messages shown to the model for memory extraction.
const MAX_MEMORY_MESSAGES: usize = 40;

const SYSTEM_PROMPT: &str = r#"You maintain long-term memory for GroosHub, an assistant for Dutch real-estate and sustainability professionals.

Respond with ONE JSON object and nothing else:
{
  "summary": string or null,
  "memory": {
    "content": string or null,
    "items": [{"kind": "preference|pattern|context|expertise", "key": string, "value": string, "confidence": number}],
    "forget": [string]
  },
  "project": {
    "hard_values": {"name": number},
    "soft_context": [{"category": "preference|constraint|goal|decision|note", "text": string, "confidence": number}]
  }
}

Rules:
- "summary": only when a block of messages to summarize is given. Keep facts, numbers, decisions and open questions. Write in the language of the conversation.
- "memory.content": a short third-person description of the user, rewritten in full, or null to keep the current one.
- "memory.items": durable facts about the USER only. Never store secrets, passwords or one-off task details.
- "memory.forget": keys the user explicitly asked you to forget.
- "project.hard_values": numbers the user stated explicitly (areas, counts, targets), snake_case names with units.
- Confidence is between 0 and 1: 0.9 for explicit statements, 0.5 for inferences.
- Use empty lists when nothing new was learned."#;

/// Thresholds for when analysis runs.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Unsummarized messages outside the recent window needed to summarize.
    pub trigger_messages: usize,
    /// Most recent messages that are never summarized.
    pub keep_recent: usize,
    pub max_summary_tokens: usize,
    /// Transcript budget for one summarization call.
    pub max_input_tokens: usize,
    pub memory: MemoryConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self::from_config(&GroosHubConfig::default())
    }
}

/// What an analysis run will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnalysisPlan {
    /// Inclusive message range to summarize.
    pub summarize_range: Option<(usize, usize)>,
    pub update_memory: bool,
}

impl AnalysisPlan {
    pub fn is_empty(&self) -> bool {
        self.summarize_range.is_none() && !self.update_memory
    }
}

impl AnalyzerConfig {
    pub fn from_config(config: &GroosHubConfig) -> Self {
        Self {
            trigger_messages: config.summarization.trigger_messages,
            keep_recent: config.summarization.keep_recent,
            max_summary_tokens: config.summarization.max_summary_tokens,
            max_input_tokens: config.summarization.max_input_tokens,
            memory: config.memory.clone(),
        }
    }

    /// Decide what to do for a chat of `total_messages` whose summaries end
    /// at `last_summarized`.
    pub fn plan(
        &self,
        total_messages: usize,
        last_summarized: Option<usize>,
        memory_due: bool,
    ) -> AnalysisPlan {
        self.plan_with_threshold(total_messages, last_summarized, memory_due, self.trigger_messages)
    }

    /// Like [`plan`](Self::plan) but summarizes any pending message and
    /// always updates memory.
    pub fn plan_forced(&self, total_messages: usize, last_summarized: Option<usize>) -> AnalysisPlan {
        self.plan_with_threshold(total_messages, last_summarized, true, 1)
    }

    /// Longest prefix of `pending` whose prompt transcript fits
    /// `max_input_tokens`. At least one message is kept so a chain of runs
    /// always makes progress.
    pub fn bound_to_input_budget<'m>(&self, pending: &'m [ChatMessage]) -> &'m [ChatMessage] {
        let mut used = 0;
        let mut keep = 0;
        for m in pending {
            used += transcript_tokens(m);
            if used > self.max_input_tokens && keep > 0 {
                break;
            }
            keep += 1;
        }
        &pending[..keep]
    }

    fn plan_with_threshold(
        &self,
        total_messages: usize,
        last_summarized: Option<usize>,
        memory_due: bool,
        threshold: usize,
    ) -> AnalysisPlan {
        let next_start = last_summarized.map_or(0, |end| end + 1);
        let summarizable_end = total_messages.saturating_sub(self.keep_recent);
        let pending = summarizable_end.saturating_sub(next_start);

        let summarize_range = (pending > 0 && pending >= threshold)
            .then(|| (next_start, summarizable_end - 1));

        AnalysisPlan {
            summarize_range,
            update_memory: memory_due && total_messages > 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub chat_id: Uuid,
    pub user_id: String,
    pub org_id: String,
    pub project_id: Option<String>,
    /// Summarize everything outside the recent window and update memory
    /// regardless of thresholds.
    pub force: bool,
}

/// What an analysis run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisOutcome {
    pub chat_id: Uuid,
    pub plan: Option<AnalysisPlan>,
    pub summary_id: Option<Uuid>,
    pub summary_range: Option<(usize, usize)>,
    pub compression_ratio: Option<f32>,
    pub memory_updated: bool,
    pub memory_token_count: Option<usize>,
    pub memory_changes: usize,
    pub memory_trimmed: bool,
    pub project_changes: usize,
}

impl AnalysisOutcome {
    pub fn did_anything(&self) -> bool {
        self.summary_id.is_some() || self.memory_updated || self.project_changes > 0
    }
}

// -- LLM response shape --

#[derive(Debug, Default, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    memory: Option<MemoryResponse>,
    #[serde(default)]
    project: Option<ProjectResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    items: Vec<ItemResponse>,
    #[serde(default, deserialize_with = "null_as_default")]
    forget: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ItemResponse {
    kind: String,
    key: String,
    value: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    hard_values: BTreeMap<String, serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    soft_context: Vec<SoftContextResponse>,
}

#[derive(Debug, Deserialize)]
struct SoftContextResponse {
    #[serde(default)]
    category: Option<String>,
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Models sometimes send `null` where a list or map is expected.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn to_memory_delta(response: Option<MemoryResponse>) -> MemoryDelta {
    let Some(response) = response else {
        return MemoryDelta::default();
    };
    let items = response
        .items
        .into_iter()
        .filter_map(|item| match item.kind.parse::<MemoryItemKind>() {
            Ok(kind) => Some(MemoryItem::new(
                kind,
                item.key,
                item.value,
                item.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            )),
            Err(e) => {
                tracing::debug!(error = %e, "dropping memory item with unknown kind");
                None
            }
        })
        .collect();
    MemoryDelta {
        content: response.content.filter(|c| !c.trim().is_empty()),
        items,
        remove_keys: response.forget,
    }
}

fn to_project_delta(response: Option<ProjectResponse>, chat_id: Uuid) -> ProjectDelta {
    let Some(response) = response else {
        return ProjectDelta::default();
    };
    let hard_values = response
        .hard_values
        .into_iter()
        .filter_map(|(name, value)| {
            let number = match &value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().replace(',', ".").parse().ok(),
                _ => None,
            };
            if number.is_none() {
                tracing::debug!(name = %name, %value, "dropping non-numeric hard value");
            }
            number.map(|n| (name, n))
        })
        .collect();
    let soft_context = response
        .soft_context
        .into_iter()
        .filter(|e| !e.text.trim().is_empty())
        .map(|e| {
            let category = e
                .category
                .as_deref()
                .and_then(|c| c.parse::<SoftContextCategory>().ok())
                .unwrap_or(SoftContextCategory::Note);
            SoftContextEntry::new(category, e.text, e.confidence.unwrap_or(DEFAULT_CONFIDENCE))
                .with_source_chat(Some(chat_id))
        })
        .collect();
    ProjectDelta {
        hard_values,
        soft_context,
    }
}

/// Build the user prompt for one analysis call.
pub fn build_prompt(
    to_summarize: &[ChatMessage],
    memory_messages: &[ChatMessage],
    previous_summary: Option<&str>,
    memory: Option<&UserMemory>,
    project: Option<&ProjectMemory>,
    max_summary_tokens: usize,
) -> String {
    let mut prompt = String::new();

    if let Some(memory) = memory {
        let block = user_memory::format_for_prompt(memory);
        if !block.is_empty() {
            prompt.push_str("# Current user memory\n");
            prompt.push_str(&block);
            prompt.push('\n');
        }
    }
    if let Some(project) = project {
        let block = project_memory::format_for_prompt(project);
        if !block.is_empty() {
            prompt.push_str("# Current project memory\n");
            prompt.push_str(&block);
            prompt.push('\n');
        }
    }

    if to_summarize.is_empty() {
        prompt.push_str("# Messages to summarize\nNone. Set \"summary\" to null.\n\n");
    } else {
        if let Some(previous) = previous_summary {
            prompt.push_str("# Summary of the conversation so far\n");
            prompt.push_str(previous.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "# Messages to summarize (at most {max_summary_tokens} tokens)\n"
        ));
        push_transcript(&mut prompt, to_summarize);
        prompt.push('\n');
    }

    if memory_messages.is_empty() {
        prompt.push_str("# Recent messages\nNone. Leave memory and project unchanged.\n");
    } else {
        prompt.push_str("# Recent messages (extract user and project memory from these)\n");
        push_transcript(&mut prompt, memory_messages);
    }
    prompt
}

/// Tokens one message costs in the prompt transcript.
fn transcript_tokens(m: &ChatMessage) -> usize {
    estimate_tokens(truncate_to_tokens(m.content.trim(), MAX_TOKENS_PER_MESSAGE)) + 4
}

fn push_transcript(prompt: &mut String, messages: &[ChatMessage]) {
    for m in messages {
        let content = truncate_to_tokens(m.content.trim(), MAX_TOKENS_PER_MESSAGE);
        prompt.push_str(&format!("[{}] {}: {}\n", m.index, m.role, content));
    }
}

/// Runs analysis for chats against one storage backend.
pub struct ConversationAnalyzer<'a, S: StorageBackend> {
    storage: &'a S,
    encryptor: &'a Encryptor,
    llm: &'a LlmService,
    config: AnalyzerConfig,
}

impl<'a, S: StorageBackend> ConversationAnalyzer<'a, S> {
    pub fn new(
        storage: &'a S,
        encryptor: &'a Encryptor,
        llm: &'a LlmService,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            storage,
            encryptor,
            llm,
            config,
        }
    }

    pub async fn analyze_chat(&self, request: AnalysisRequest) -> Result<AnalysisOutcome> {
        let mut outcome = AnalysisOutcome {
            chat_id: request.chat_id,
            ..Default::default()
        };

        let messages = self.storage.get_messages(request.chat_id, 0).await?;
        if messages.is_empty() {
            tracing::debug!(chat_id = %request.chat_id, "no messages, nothing to analyze");
            return Ok(outcome);
        }

        let summaries = SummaryStore::new(self.storage, self.encryptor);
        let users = UserMemoryStore::new(self.storage, self.encryptor, &self.config.memory);
        let projects = ProjectMemoryStore::new(self.storage, self.encryptor, &self.config.memory);

        let last_summarized = summaries.last_summarized_index(request.chat_id).await?;
        let memory = users.get(&request.user_id).await?;
        if let Some(existing) = &memory {
            if existing.org_id != request.org_id {
                return Err(GroosHubError::InvalidInput(format!(
                    "user {} belongs to organization {}, not {}",
                    request.user_id, existing.org_id, request.org_id
                )));
            }
        }
        let project = match &request.project_id {
            Some(id) => Some(projects.get_or_default(id, &request.org_id).await?),
            None => None,
        };

        let mark = self
            .storage
            .get_analysis_mark(&request.user_id, request.chat_id)
            .await?;
        let new_messages = user_memory::messages_after_mark(mark, &messages);
        let mut plan = if request.force {
            self.config.plan_forced(messages.len(), last_summarized)
        } else {
            let due = user_memory::should_update(memory.as_ref(), new_messages, &self.config.memory);
            self.config.plan(messages.len(), last_summarized, due)
        };
        if plan.is_empty() {
            outcome.plan = Some(plan);
            tracing::debug!(chat_id = %request.chat_id, "nothing due");
            return Ok(outcome);
        }

        let to_summarize: &[ChatMessage] = match plan.summarize_range {
            Some((start, end)) => {
                let bounded = self
                    .config
                    .bound_to_input_budget(message_range(&messages, start, end)?);
                if bounded.len() < end + 1 - start {
                    tracing::debug!(
                        chat_id = %request.chat_id,
                        pending = end + 1 - start,
                        kept = bounded.len(),
                        "summary range cut to input budget"
                    );
                    plan.summarize_range = Some((start, start + bounded.len() - 1));
                }
                bounded
            }
            None => &[],
        };
        outcome.plan = Some(plan);
        tracing::debug!(chat_id = %request.chat_id, ?plan, "analysis plan");

        let memory_messages: &[ChatMessage] = if plan.update_memory {
            let source = if new_messages.is_empty() {
                &messages[messages.len().saturating_sub(self.config.keep_recent.max(1))..]
            } else {
                new_messages
            };
            &source[source.len().saturating_sub(MAX_MEMORY_MESSAGES)..]
        } else {
            &[]
        };
        let previous_summary = if to_summarize.is_empty() {
            None
        } else {
            summaries
                .list_summaries(request.chat_id)
                .await?
                .pop()
                .map(|s| s.summary)
        };

        let prompt = build_prompt(
            to_summarize,
            memory_messages,
            previous_summary.as_deref(),
            memory.as_ref(),
            project.as_ref(),
            self.config.max_summary_tokens,
        );
        let response: AnalysisResponse = self
            .llm
            .generate_structured(&prompt, Some(SYSTEM_PROMPT))
            .await?;

        // Validate everything before the first write.
        let summary_text = match plan.summarize_range {
            Some(_) => {
                let text = response.summary.as_deref().map(str::trim).unwrap_or_default();
                if text.is_empty() {
                    return Err(GroosHubError::Llm(
                        "analysis response is missing the requested summary".into(),
                    ));
                }
                Some(truncate_to_tokens(text, self.config.max_summary_tokens).to_string())
            }
            None => None,
        };
        let memory_delta = to_memory_delta(response.memory);
        let project_delta = to_project_delta(response.project, request.chat_id);

        // Memory writes merge and are safe to repeat, so they go first. The
        // analysis mark follows them and the summary is written last: if the
        // summary write fails, a rerun retries it without re-applying the
        // memory delta.
        if plan.update_memory {
            let write = users
                .apply_delta(
                    &request.user_id,
                    &request.org_id,
                    memory_delta,
                    Some(request.chat_id),
                )
                .await?;
            outcome.memory_updated = true;
            outcome.memory_token_count = Some(write.memory.token_count);
            outcome.memory_changes = write.merge.changed();
            outcome.memory_trimmed = !write.trimmed.is_empty();

            if let Some(project_id) = &request.project_id {
                if !project_delta.is_empty() {
                    let write = projects
                        .apply_delta(project_id, &request.org_id, project_delta)
                        .await?;
                    outcome.project_changes = write.hard_values_set + write.merge.changed();
                }
            }

            if let Some(last) = messages.last() {
                self.storage
                    .save_analysis_mark(&request.user_id, request.chat_id, last.index)
                    .await?;
            }
        }

        if let (Some((start, end)), Some(text)) = (plan.summarize_range, summary_text) {
            let summary: ChatSummary = summaries
                .create_summary(NewSummary {
                    chat_id: request.chat_id,
                    org_id: request.org_id.clone(),
                    start_index: start,
                    end_index: end,
                    summary: text,
                    original_tokens: estimate_messages_tokens(to_summarize),
                })
                .await?;
            outcome.summary_id = Some(summary.id);
            outcome.summary_range = Some((start, end));
            outcome.compression_ratio = Some(summary.compression_ratio);
        }

        tracing::info!(
            chat_id = %request.chat_id,
            user_id = %request.user_id,
            summarized = ?outcome.summary_range,
            memory_changes = outcome.memory_changes,
            project_changes = outcome.project_changes,
            "chat analyzed"
        );
        Ok(outcome)
    }
}

/// Messages `start..=end`, which must be present and contiguous.
fn message_range(messages: &[ChatMessage], start: usize, end: usize) -> Result<&[ChatMessage]> {
    let slice = messages.get(start..=end).ok_or_else(|| {
        GroosHubError::Storage(format!(
            "chat has {} messages, cannot summarize {start}..={end}",
            messages.len()
        ))
    })?;
    let contiguous = slice
        .iter()
        .enumerate()
        .all(|(offset, m)| m.index == start + offset);
    if !contiguous {
        return Err(GroosHubError::Storage(format!(
            "message indexes {start}..={end} are not contiguous"
        )));
    }
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageRole;

    fn config() -> AnalyzerConfig {
        AnalyzerConfig {
            trigger_messages: 20,
            keep_recent: 10,
            max_summary_tokens: 400,
            max_input_tokens: 8_000,
            memory: MemoryConfig::default(),
        }
    }

    fn messages(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                };
                ChatMessage::new(Uuid::nil(), i, role, format!("message {i}"))
            })
            .collect()
    }

    #[test]
    fn plan_waits_for_trigger_outside_recent_window() {
        let cfg = config();
        assert!(cfg.plan(29, None, false).is_empty());
        assert_eq!(cfg.plan(30, None, false).summarize_range, Some((0, 19)));
    }

    #[test]
    fn plan_continues_after_last_summary() {
        let cfg = config();
        assert_eq!(cfg.plan(45, Some(19), false).summarize_range, None);
        assert_eq!(cfg.plan(50, Some(19), false).summarize_range, Some((20, 39)));
    }

    #[test]
    fn plan_memory_flag_passes_through() {
        let cfg = config();
        let plan = cfg.plan(5, None, true);
        assert!(plan.summarize_range.is_none());
        assert!(plan.update_memory);
        assert!(!cfg.plan(0, None, true).update_memory);
    }

    #[test]
    fn forced_plan_summarizes_any_pending_message() {
        let cfg = config();
        let plan = cfg.plan_forced(12, None);
        assert_eq!(plan.summarize_range, Some((0, 1)));
        assert!(plan.update_memory);

        let nothing_pending = cfg.plan_forced(10, None);
        assert_eq!(nothing_pending.summarize_range, None);
        assert!(nothing_pending.update_memory);

        assert_eq!(cfg.plan_forced(15, Some(4)).summarize_range, None);
    }

    #[test]
    fn input_budget_keeps_a_prefix_of_pending_messages() {
        let msgs = messages(30);
        let per_message = transcript_tokens(&msgs[0]);
        let cfg = AnalyzerConfig {
            max_input_tokens: per_message * 3,
            ..config()
        };
        let kept = cfg.bound_to_input_budget(&msgs[..20]);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].index, 0);

        assert_eq!(config().bound_to_input_budget(&msgs[..20]).len(), 20);
    }

    #[test]
    fn input_budget_always_keeps_one_message() {
        let mut msgs = messages(3);
        msgs[0].content = "x".repeat(20_000);
        let cfg = AnalyzerConfig {
            max_input_tokens: 100,
            ..config()
        };
        assert_eq!(cfg.bound_to_input_budget(&msgs).len(), 1);
        assert!(cfg.bound_to_input_budget(&[]).is_empty());
    }

    #[test]
    fn message_range_checks_bounds_and_contiguity() {
        let msgs = messages(5);
        assert_eq!(message_range(&msgs, 1, 3).unwrap().len(), 3);
        assert!(message_range(&msgs, 3, 7).is_err());

        let mut gappy = messages(5);
        gappy[2].index = 9;
        assert!(message_range(&gappy, 0, 4).is_err());
    }

    #[test]
    fn prompt_contains_sections() {
        let msgs = messages(4);
        let mut memory = UserMemory::new("u".into(), "o".into());
        memory.content = "Architect in Rotterdam.".into();

        let prompt = build_prompt(
            &msgs[..2],
            &msgs[2..],
            Some("Earlier: intro."),
            Some(&memory),
            None,
            300,
        );
        assert!(prompt.contains("# Current user memory\n## About the user\nArchitect in Rotterdam."));
        assert!(prompt.contains("# Summary of the conversation so far\nEarlier: intro."));
        assert!(prompt
            .contains("(at most 300 tokens)\n[0] user: message 0\n[1] assistant: message 1\n"));
        assert!(prompt.contains("[3] assistant: message 3"));
        assert!(!prompt.contains("Current project memory"));
    }

    #[test]
    fn prompt_without_summary_work_says_so() {
        let msgs = messages(2);
        let prompt = build_prompt(&[], &msgs, Some("ignored"), None, None, 300);
        assert!(prompt.contains("None. Set \"summary\" to null."));
        assert!(!prompt.contains("ignored"));
    }

    #[test]
    fn memory_response_drops_unknown_kinds_and_clamps() {
        let response: AnalysisResponse = serde_json::from_str(
            r#"{"memory": {"content": " ", "items": [
                {"kind": "preference", "key": "units", "value": "metric", "confidence": 1.7},
                {"kind": "mood", "key": "x", "value": "y"},
                {"kind": "skill", "key": "BIM", "value": "Revit"}
            ], "forget": ["employer"]}}"#,
        )
        .unwrap();
        let delta = to_memory_delta(response.memory);
        assert!(delta.content.is_none());
        assert_eq!(delta.items.len(), 2);
        assert_eq!(delta.items[0].confidence, 1.0);
        assert_eq!(delta.items[1].kind, MemoryItemKind::Expertise);
        assert_eq!(delta.items[1].confidence, 0.5);
        assert_eq!(delta.remove_keys, vec!["employer".to_string()]);
    }

    #[test]
    fn project_response_coerces_numbers_and_categories() {
        let response: AnalysisResponse = serde_json::from_str(
            r#"{"project": {
                "hard_values": {"gfa_m2": 12500, "mpg_target": "0,8", "name": "Blok A"},
                "soft_context": [
                    {"category": "goal", "text": "BENG compliant", "confidence": 0.9},
                    {"category": "wish", "text": "green roof"},
                    {"text": "  "}
                ]
            }}"#,
        )
        .unwrap();
        let chat = Uuid::now_v7();
        let delta = to_project_delta(response.project, chat);
        assert_eq!(delta.hard_values.len(), 2);
        assert_eq!(delta.hard_values["mpg_target"], 0.8);
        assert_eq!(delta.soft_context.len(), 2);
        assert_eq!(delta.soft_context[1].category, SoftContextCategory::Note);
        assert_eq!(delta.soft_context[0].source_chat_id, Some(chat));
    }

    #[test]
    fn empty_response_yields_empty_deltas() {
        let response: AnalysisResponse = serde_json::from_str("{}").unwrap();
        assert!(to_memory_delta(response.memory).is_empty());
        assert!(to_project_delta(response.project, Uuid::nil()).is_empty());
    }

    #[test]
    fn null_lists_are_tolerated() {
        let response: AnalysisResponse = serde_json::from_str(
            r#"{"summary": null,
                "memory": {"content": null, "items": null, "forget": null},
                "project": {"hard_values": null, "soft_context": [{"text": "t", "confidence": null}]}}"#,
        )
        .unwrap();
        assert!(response.summary.is_none());
        assert!(to_memory_delta(response.memory).is_empty());
        let project = to_project_delta(response.project, Uuid::nil());
        assert_eq!(project.soft_context[0].confidence, 0.5);
    }
}
