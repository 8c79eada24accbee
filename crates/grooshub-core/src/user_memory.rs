//! Per-user memory: a short free-text narrative plus confidence-scored items.
//!
//! Every write goes through the soft cap: when the formatted memory exceeds
//! `memory.max_tokens`, the weakest items are dropped first and then the tail
//! of the free text is cut. Trimming is logged to the audit trail as
//! [`UpdateType::Trimmed`].

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::crypto::Encryptor;
use crate::error::{GroosHubError, Result};
use crate::merge::{self, MergeReport};
use crate::model::{
    ChatMessage, MemoryDelta, MemoryItem, MemoryItemKind, MemoryUpdate, UpdateType, UserMemory,
};
use crate::storage::{MemoryUpdateRow, StorageBackend, UserMemoryRow};
use crate::tokens::{estimate_tokens, truncate_to_tokens};

/// Phrases that signal the user is stating something worth remembering.
const DEFAULT_TRIGGER_PHRASES: &[&str] = &[
    "remember",
    "don't forget",
    "forget that",
    "i prefer",
    "i'd prefer",
    "my name is",
    "call me",
    "i work",
    "i am a",
    "i'm a",
    "from now on",
    "always",
    "never",
    // Dutch
    "onthoud",
    "vergeet niet",
    "ik werk",
    "ik ben",
    "mijn naam is",
    "noem me",
    "ik heb liever",
    "voortaan",
    "altijd",
    "nooit",
];

static DEFAULT_TRIGGERS: LazyLock<Option<Regex>> =
    LazyLock::new(|| build_trigger_regex(DEFAULT_TRIGGER_PHRASES.iter().copied()));

fn build_trigger_regex<'a>(phrases: impl IntoIterator<Item = &'a str>) -> Option<Regex> {
    let alternatives: Vec<String> = phrases
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).ok()
}

/// True when any user message contains an explicit trigger phrase.
pub fn contains_trigger_phrase(messages: &[ChatMessage], extra_phrases: &[String]) -> bool {
    let extra = build_trigger_regex(extra_phrases.iter().map(String::as_str));
    messages.iter().filter(|m| m.is_user()).any(|m| {
        DEFAULT_TRIGGERS
            .as_ref()
            .is_some_and(|re| re.is_match(&m.content))
            || extra.as_ref().is_some_and(|re| re.is_match(&m.content))
    })
}

/// Decide whether `new_messages` (those since the last analysis) warrant a
/// memory update.
pub fn should_update(
    memory: Option<&UserMemory>,
    new_messages: &[ChatMessage],
    config: &MemoryConfig,
) -> bool {
    let user_messages = new_messages.iter().filter(|m| m.is_user()).count();
    if user_messages == 0 {
        return false;
    }

    let has_memory = memory.is_some_and(|m| !m.is_empty());
    if !has_memory && user_messages >= config.min_messages_first {
        return true;
    }
    if has_memory && user_messages >= config.update_interval_messages {
        return true;
    }
    contains_trigger_phrase(new_messages, &config.trigger_phrases)
}

/// Messages after the chat's analysis mark (the last message index already
/// analyzed for this user). Positions, not timestamps, decide what is new:
/// imported history and other chats must not hide unanalyzed messages.
pub fn messages_after_mark(
    last_analyzed: Option<usize>,
    messages: &[ChatMessage],
) -> &[ChatMessage] {
    match last_analyzed {
        Some(mark) => {
            let first_new = messages.partition_point(|m| m.index <= mark);
            &messages[first_new..]
        }
        None => messages,
    }
}

/// Render a memory as a system-prompt block. Empty memories render as "".
pub fn format_for_prompt(memory: &UserMemory) -> String {
    if memory.is_empty() {
        return String::new();
    }

    let mut out = String::from("## About the user\n");
    let content = memory.content.trim();
    if !content.is_empty() {
        out.push_str(content);
        out.push('\n');
    }

    for (kind, heading) in [
        (MemoryItemKind::Preference, "Preferences"),
        (MemoryItemKind::Expertise, "Expertise"),
        (MemoryItemKind::Context, "Context"),
        (MemoryItemKind::Pattern, "Patterns"),
    ] {
        let mut items: Vec<&MemoryItem> = memory.items_of(kind).collect();
        if items.is_empty() {
            continue;
        }
        items.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        out.push_str(&format!("\n{heading}:\n"));
        for item in items {
            out.push_str(&format!("- {}: {}\n", item.key, item.value));
        }
    }
    out
}

/// What the soft cap removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrimReport {
    pub dropped_keys: Vec<String>,
    pub content_truncated: bool,
}

impl TrimReport {
    pub fn is_empty(&self) -> bool {
        self.dropped_keys.is_empty() && !self.content_truncated
    }
}

/// Shrink `memory` until its formatted form fits in `max_tokens`.
pub fn enforce_soft_cap(memory: &mut UserMemory, max_tokens: usize) -> TrimReport {
    let mut report = TrimReport::default();

    while estimate_tokens(&format_for_prompt(memory)) > max_tokens && !memory.items.is_empty() {
        let weakest = memory
            .items
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then(a.updated_at.cmp(&b.updated_at))
            })
            .map(|(i, _)| i);
        if let Some(i) = weakest {
            report.dropped_keys.push(memory.items.remove(i).key);
        }
    }

    loop {
        let total = estimate_tokens(&format_for_prompt(memory));
        if total <= max_tokens || memory.content.is_empty() {
            break;
        }
        let current = estimate_tokens(&memory.content);
        let target = current.saturating_sub(total - max_tokens);
        let cut = truncate_to_tokens(&memory.content, target).to_string();
        if cut.len() >= memory.content.len() {
            memory.content.clear();
        } else {
            memory.content = cut;
        }
        report.content_truncated = true;
    }

    memory.token_count = estimate_tokens(&format_for_prompt(memory));
    report
}

/// Result of a write through [`UserMemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryWrite {
    pub memory: UserMemory,
    pub merge: MergeReport,
    pub trimmed: TrimReport,
}

/// The encrypted part of a stored user memory.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    items: Vec<MemoryItem>,
}

pub struct UserMemoryStore<'a, S: StorageBackend> {
    storage: &'a S,
    encryptor: &'a Encryptor,
    config: &'a MemoryConfig,
}

impl<'a, S: StorageBackend> UserMemoryStore<'a, S> {
    pub fn new(storage: &'a S, encryptor: &'a Encryptor, config: &'a MemoryConfig) -> Self {
        Self {
            storage,
            encryptor,
            config,
        }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserMemory>> {
        let Some(row) = self.storage.get_user_memory(user_id).await? else {
            return Ok(None);
        };
        let payload: MemoryPayload = self
            .encryptor
            .open_json(&row.payload, row.is_encrypted, &row.org_id)?;
        Ok(Some(UserMemory {
            user_id: row.user_id,
            org_id: row.org_id,
            content: payload.content,
            items: payload.items,
            token_count: row.token_count,
            last_analysis_at: row.last_analysis_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    pub async fn get_or_default(&self, user_id: &str, org_id: &str) -> Result<UserMemory> {
        Ok(self
            .get(user_id)
            .await?
            .unwrap_or_else(|| UserMemory::new(user_id.to_string(), org_id.to_string())))
    }

    /// Merge an analyzer delta into the user's memory.
    pub async fn apply_delta(
        &self,
        user_id: &str,
        org_id: &str,
        delta: MemoryDelta,
        source_chat_id: Option<Uuid>,
    ) -> Result<MemoryWrite> {
        self.write_delta(user_id, org_id, delta, source_chat_id, UpdateType::Analysis)
            .await
    }

    /// Merge a hand-written delta (CLI edits, admin tools).
    pub async fn apply_manual(
        &self,
        user_id: &str,
        org_id: &str,
        delta: MemoryDelta,
    ) -> Result<MemoryWrite> {
        self.write_delta(user_id, org_id, delta, None, UpdateType::Manual)
            .await
    }

    /// Replace the free-text part of the memory.
    pub async fn set_content(
        &self,
        user_id: &str,
        org_id: &str,
        content: &str,
    ) -> Result<MemoryWrite> {
        let delta = MemoryDelta {
            content: Some(content.to_string()),
            ..Default::default()
        };
        self.write_delta(user_id, org_id, delta, None, UpdateType::Manual)
            .await
    }

    /// Forget everything about a user. The audit trail is kept.
    pub async fn reset(&self, user_id: &str) -> Result<bool> {
        let Some(row) = self.storage.get_user_memory(user_id).await? else {
            return Ok(false);
        };
        self.storage.delete_user_memory(user_id).await?;
        let update = MemoryUpdate::new(
            user_id.to_string(),
            UpdateType::Reset,
            "memory reset".to_string(),
        );
        self.append_audit(&row.org_id, update).await?;
        tracing::info!(user_id, "user memory reset");
        Ok(true)
    }

    /// Audit entries for a user, newest first, deltas decrypted.
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryUpdate>> {
        let rows = self.storage.list_memory_updates(user_id, limit).await?;
        rows.into_iter()
            .map(|row| {
                let delta: serde_json::Value = self
                    .encryptor
                    .open_json(&row.delta, row.is_encrypted, &row.org_id)?;
                Ok(MemoryUpdate {
                    id: row.id,
                    user_id: row.user_id,
                    update_type: row.update_type,
                    change_summary: row.change_summary,
                    delta,
                    source_chat_id: row.source_chat_id,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn write_delta(
        &self,
        user_id: &str,
        org_id: &str,
        delta: MemoryDelta,
        source_chat_id: Option<Uuid>,
        update_type: UpdateType,
    ) -> Result<MemoryWrite> {
        if user_id.trim().is_empty() {
            return Err(GroosHubError::InvalidInput("user id cannot be empty".into()));
        }
        let mut memory = self.get_or_default(user_id, org_id).await?;
        if memory.org_id != org_id {
            return Err(GroosHubError::InvalidInput(format!(
                "user {user_id} belongs to organization {}, not {org_id}",
                memory.org_id
            )));
        }

        let delta_json = serde_json::to_value(&delta)?;
        let mut report = merge::merge_items(&mut memory.items, delta.items);
        report.removed += merge::remove_keys(&mut memory.items, &delta.remove_keys);
        report.removed += merge::prune(&mut memory.items, self.config.min_confidence);
        let content_changed = match delta.content {
            Some(content) if !content.trim().is_empty() => {
                memory.content = content.trim().to_string();
                true
            }
            _ => false,
        };

        let trimmed = enforce_soft_cap(&mut memory, self.config.max_tokens);
        let now = Utc::now();
        memory.updated_at = now;
        if update_type == UpdateType::Analysis {
            memory.last_analysis_at = Some(now);
        }

        self.save(&memory).await?;

        let mut change_summary = report.to_string();
        if content_changed {
            change_summary.push_str(", content updated");
        }
        let update = MemoryUpdate::new(user_id.to_string(), update_type, change_summary)
            .with_delta(delta_json)
            .with_source_chat(source_chat_id);
        self.append_audit(&memory.org_id, update).await?;

        if !trimmed.is_empty() {
            let update = MemoryUpdate::new(
                user_id.to_string(),
                UpdateType::Trimmed,
                format!(
                    "soft cap of {} tokens: dropped {} item(s){}",
                    self.config.max_tokens,
                    trimmed.dropped_keys.len(),
                    if trimmed.content_truncated {
                        ", truncated content"
                    } else {
                        ""
                    }
                ),
            )
            .with_delta(serde_json::to_value(&trimmed)?)
            .with_source_chat(source_chat_id);
            self.append_audit(&memory.org_id, update).await?;
            tracing::warn!(
                user_id,
                dropped = trimmed.dropped_keys.len(),
                content_truncated = trimmed.content_truncated,
                "user memory trimmed to soft cap"
            );
        }

        tracing::info!(
            user_id,
            update_type = %update_type,
            changed = report.changed(),
            token_count = memory.token_count,
            "user memory updated"
        );

        Ok(MemoryWrite {
            memory,
            merge: report,
            trimmed,
        })
    }

    async fn save(&self, memory: &UserMemory) -> Result<()> {
        let payload = MemoryPayload {
            content: memory.content.clone(),
            items: memory.items.clone(),
        };
        let sealed = self.encryptor.seal_json(&payload, &memory.org_id)?;
        self.storage
            .save_user_memory(&UserMemoryRow {
                user_id: memory.user_id.clone(),
                org_id: memory.org_id.clone(),
                payload: sealed.data,
                is_encrypted: sealed.encrypted,
                token_count: memory.token_count,
                last_analysis_at: memory.last_analysis_at,
                created_at: memory.created_at,
                updated_at: memory.updated_at,
            })
            .await
    }

    async fn append_audit(&self, org_id: &str, update: MemoryUpdate) -> Result<()> {
        let sealed = self.encryptor.seal_json(&update.delta, org_id)?;
        self.storage
            .append_memory_update(&MemoryUpdateRow {
                id: update.id,
                user_id: update.user_id,
                org_id: org_id.to_string(),
                update_type: update.update_type,
                change_summary: update.change_summary,
                delta: sealed.data,
                is_encrypted: sealed.encrypted,
                source_chat_id: update.source_chat_id,
                created_at: update.created_at,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageRole;
    use crate::storage::SqliteStorage;

    fn item(kind: MemoryItemKind, key: &str, value: &str, confidence: f32) -> MemoryItem {
        MemoryItem::new(kind, key.to_string(), value.to_string(), confidence)
    }

    fn user_msg(index: usize, content: &str) -> ChatMessage {
        ChatMessage::new(Uuid::nil(), index, MessageRole::User, content.to_string())
    }

    fn assistant_msg(index: usize, content: &str) -> ChatMessage {
        ChatMessage::new(Uuid::nil(), index, MessageRole::Assistant, content.to_string())
    }

    fn encryptor() -> Encryptor {
        Encryptor::with_master_key("user-memory-test-key", 1_000).unwrap()
    }

    // -- should_update --

    #[test]
    fn first_analysis_waits_for_enough_user_messages() {
        let config = MemoryConfig::default();
        let two = vec![user_msg(0, "hoi"), assistant_msg(1, "hallo"), user_msg(2, "vraag")];
        assert!(!should_update(None, &two, &config));

        let three = vec![user_msg(0, "a"), user_msg(1, "b"), user_msg(2, "c")];
        assert!(should_update(None, &three, &config));
    }

    #[test]
    fn existing_memory_updates_on_interval() {
        let config = MemoryConfig::default();
        let mut memory = UserMemory::new("u".into(), "o".into());
        memory.content = "Works on LCA projects.".into();

        let few: Vec<ChatMessage> = (0..3).map(|i| user_msg(i, "question")).collect();
        assert!(!should_update(Some(&memory), &few, &config));

        let many: Vec<ChatMessage> = (0..10).map(|i| user_msg(i, "question")).collect();
        assert!(should_update(Some(&memory), &many, &config));
    }

    #[test]
    fn trigger_phrases_force_update() {
        let config = MemoryConfig::default();
        let mut memory = UserMemory::new("u".into(), "o".into());
        memory.content = "x".into();

        assert!(should_update(
            Some(&memory),
            &[user_msg(0, "Please remember that I report in tonnes CO2-eq")],
            &config
        ));
        assert!(should_update(
            Some(&memory),
            &[user_msg(0, "Onthoud dat ik bij de gemeente werk")],
            &config
        ));
        assert!(should_update(
            Some(&memory),
            &[user_msg(0, "ik werk als projectontwikkelaar")],
            &config
        ));
        // Substrings inside other words do not count.
        assert!(!should_update(
            Some(&memory),
            &[user_msg(0, "Does the nevermind clause apply here?")],
            &config
        ));
        // Only user messages are considered.
        assert!(!should_update(
            Some(&memory),
            &[assistant_msg(0, "I will always answer in Dutch")],
            &config
        ));
    }

    #[test]
    fn configured_trigger_phrases_are_escaped() {
        let config = MemoryConfig {
            trigger_phrases: vec!["note (this)".into(), "  ".into()],
            ..Default::default()
        };
        let mut memory = UserMemory::new("u".into(), "o".into());
        memory.content = "x".into();
        assert!(should_update(
            Some(&memory),
            &[user_msg(0, "please NOTE (THIS) for later")],
            &config
        ));
    }

    #[test]
    fn messages_after_mark_uses_positions_not_timestamps() {
        let now = Utc::now();
        let messages = vec![
            user_msg(0, "old").with_created_at(now - chrono::Duration::days(30)),
            user_msg(1, "imported").with_created_at(now - chrono::Duration::days(20)),
            user_msg(2, "new").with_created_at(now),
        ];
        assert_eq!(messages_after_mark(None, &messages).len(), 3);

        let new = messages_after_mark(Some(0), &messages);
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].content, "imported");

        assert!(messages_after_mark(Some(2), &messages).is_empty());
    }

    // -- formatting and soft cap --

    #[test]
    fn format_groups_items_by_kind() {
        let mut memory = UserMemory::new("u".into(), "o".into());
        memory.content = "Sustainability advisor in Utrecht.".into();
        memory.items = vec![
            item(MemoryItemKind::Preference, "language", "Dutch", 0.5),
            item(MemoryItemKind::Preference, "units", "metric", 0.9),
            item(MemoryItemKind::Expertise, "LCA", "advanced", 0.7),
        ];
        let text = format_for_prompt(&memory);
        assert!(text.starts_with("## About the user\nSustainability advisor"));
        let units = text.find("- units: metric").unwrap();
        let language = text.find("- language: Dutch").unwrap();
        assert!(units < language, "higher confidence listed first");
        assert!(text.contains("Expertise:\n- LCA: advanced"));
        assert!(!text.contains("Patterns:"));
    }

    #[test]
    fn format_empty_memory_is_empty() {
        assert_eq!(format_for_prompt(&UserMemory::new("u".into(), "o".into())), "");
    }

    #[test]
    fn soft_cap_drops_weakest_items_first() {
        let mut memory = UserMemory::new("u".into(), "o".into());
        memory.content = "Short bio.".into();
        memory.items = (0..40)
            .map(|i| {
                item(
                    MemoryItemKind::Context,
                    &format!("fact-{i:02}"),
                    "a moderately long value describing the fact",
                    i as f32 / 40.0,
                )
            })
            .collect();

        let report = enforce_soft_cap(&mut memory, 200);
        assert!(!report.dropped_keys.is_empty());
        assert!(!report.content_truncated);
        assert_eq!(report.dropped_keys[0], "fact-00");
        assert!(memory.token_count <= 200);
        assert!(memory.items.iter().any(|i| i.key == "fact-39"));
        assert_eq!(memory.content, "Short bio.");
    }

    #[test]
    fn soft_cap_truncates_content_tail_after_items() {
        let mut memory = UserMemory::new("u".into(), "o".into());
        memory.content = "word ".repeat(600);
        memory.items = vec![item(MemoryItemKind::Preference, "units", "metric", 0.9)];

        let report = enforce_soft_cap(&mut memory, 100);
        assert_eq!(report.dropped_keys, vec!["units".to_string()]);
        assert!(report.content_truncated);
        assert!(memory.token_count <= 100);
        assert!(memory.content.starts_with("word word"));
    }

    #[test]
    fn soft_cap_noop_under_limit() {
        let mut memory = UserMemory::new("u".into(), "o".into());
        memory.content = "Prefers concise answers.".into();
        let report = enforce_soft_cap(&mut memory, 500);
        assert!(report.is_empty());
        assert_eq!(memory.token_count, estimate_tokens(&format_for_prompt(&memory)));
    }

    // -- store --

    #[tokio::test]
    async fn apply_delta_persists_encrypted_and_audits() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let enc = encryptor();
        let config = MemoryConfig::default();
        let store = UserMemoryStore::new(&storage, &enc, &config);
        let chat = Uuid::now_v7();

        let delta = MemoryDelta {
            content: Some("Project developer at a housing corporation.".into()),
            items: vec![item(MemoryItemKind::Preference, "language", "Dutch", 0.8)],
            remove_keys: vec![],
        };
        let write = store.apply_delta("u1", "org-a", delta, Some(chat)).await.unwrap();
        assert_eq!(write.merge.added, 1);
        assert!(write.memory.last_analysis_at.is_some());
        assert!(write.trimmed.is_empty());

        let row = storage.get_user_memory("u1").await.unwrap().unwrap();
        assert!(row.is_encrypted);
        assert!(!row.payload.contains("housing"));

        let loaded = store.get("u1").await.unwrap().unwrap();
        assert_eq!(loaded.content, "Project developer at a housing corporation.");
        assert_eq!(loaded.items.len(), 1);
        assert_eq!(loaded.token_count, write.memory.token_count);

        let history = store.history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].update_type, UpdateType::Analysis);
        assert_eq!(history[0].source_chat_id, Some(chat));
        assert_eq!(history[0].delta["items"][0]["key"], "language");
    }

    #[tokio::test]
    async fn apply_delta_merges_removes_and_prunes() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let enc = Encryptor::disabled();
        let config = MemoryConfig::default();
        let store = UserMemoryStore::new(&storage, &enc, &config);

        let first = MemoryDelta {
            items: vec![
                item(MemoryItemKind::Preference, "units", "metric", 0.5),
                item(MemoryItemKind::Context, "employer", "Gemeente Utrecht", 0.9),
            ],
            ..Default::default()
        };
        store.apply_delta("u1", "org-a", first, None).await.unwrap();

        let second = MemoryDelta {
            items: vec![
                item(MemoryItemKind::Preference, "units", "Metric", 0.5),
                item(MemoryItemKind::Pattern, "style", "asks for sources", 0.1),
            ],
            remove_keys: vec!["employer".into()],
            ..Default::default()
        };
        let write = store.apply_delta("u1", "org-a", second, None).await.unwrap();
        assert_eq!(write.merge.reinforced, 1);
        assert_eq!(write.merge.added, 1);
        // employer removed on request, style pruned below min_confidence
        assert_eq!(write.merge.removed, 2);

        let memory = store.get("u1").await.unwrap().unwrap();
        assert_eq!(memory.items.len(), 1);
        assert!((memory.items[0].confidence - 0.75).abs() < 1e-6);
    }

    #[tokio::test]
    async fn oversized_write_is_trimmed_and_audited() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let enc = Encryptor::disabled();
        let config = MemoryConfig {
            max_tokens: 60,
            ..Default::default()
        };
        let store = UserMemoryStore::new(&storage, &enc, &config);

        let delta = MemoryDelta {
            content: Some("Long narrative. ".repeat(40)),
            items: (0..5)
                .map(|i| {
                    item(
                        MemoryItemKind::Context,
                        &format!("k{i}"),
                        "some contextual value",
                        0.5 + i as f32 / 10.0,
                    )
                })
                .collect(),
            ..Default::default()
        };
        let write = store.apply_delta("u1", "org-a", delta, None).await.unwrap();
        assert!(write.memory.token_count <= 60);
        assert!(!write.trimmed.is_empty());

        let history = store.history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].update_type, UpdateType::Trimmed);
        assert_eq!(history[1].update_type, UpdateType::Analysis);
    }

    #[tokio::test]
    async fn set_content_is_manual_and_keeps_analysis_time() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let enc = Encryptor::disabled();
        let config = MemoryConfig::default();
        let store = UserMemoryStore::new(&storage, &enc, &config);

        let write = store
            .set_content("u1", "org-a", "  Prefers short answers.  ")
            .await
            .unwrap();
        assert_eq!(write.memory.content, "Prefers short answers.");
        assert!(write.memory.last_analysis_at.is_none());

        let history = store.history("u1", 10).await.unwrap();
        assert_eq!(history[0].update_type, UpdateType::Manual);
        assert!(history[0].change_summary.contains("content updated"));
    }

    #[tokio::test]
    async fn reset_deletes_memory_but_keeps_history() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let enc = encryptor();
        let config = MemoryConfig::default();
        let store = UserMemoryStore::new(&storage, &enc, &config);

        assert!(!store.reset("u1").await.unwrap());
        store.set_content("u1", "org-a", "Something").await.unwrap();
        assert!(store.reset("u1").await.unwrap());
        assert!(store.get("u1").await.unwrap().is_none());

        let history = store.history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].update_type, UpdateType::Reset);
    }

    #[tokio::test]
    async fn rejects_cross_org_writes() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let enc = Encryptor::disabled();
        let config = MemoryConfig::default();
        let store = UserMemoryStore::new(&storage, &enc, &config);

        store.set_content("u1", "org-a", "x").await.unwrap();
        let err = store.set_content("u1", "org-b", "y").await.unwrap_err();
        assert!(matches!(err, GroosHubError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn encrypted_memory_without_key_fails_hard() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let config = MemoryConfig::default();
        {
            let enc = encryptor();
            let store = UserMemoryStore::new(&storage, &enc, &config);
            store.set_content("u1", "org-a", "secret").await.unwrap();
        }
        let disabled = Encryptor::disabled();
        let store = UserMemoryStore::new(&storage, &disabled, &config);
        let err = store.get("u1").await.unwrap_err();
        assert!(matches!(err, GroosHubError::Encryption(_)));
    }
}
