use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clamp_confidence;

/// Everything GroosHub has learned about one user. One row per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemory {
    pub user_id: String,
    pub org_id: String,
    /// Free-text narrative ("Works as a project developer in Utrecht...").
    pub content: String,
    /// Structured, confidence-scored facts.
    pub items: Vec<MemoryItem>,
    pub token_count: usize,
    pub last_analysis_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserMemory {
    pub fn new(user_id: String, org_id: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            org_id,
            content: String::new(),
            items: Vec::new(),
            token_count: 0,
            last_analysis_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.items.is_empty()
    }

    pub fn items_of(&self, kind: MemoryItemKind) -> impl Iterator<Item = &MemoryItem> {
        self.items.iter().filter(move |i| i.kind == kind)
    }

    pub fn find(&self, kind: MemoryItemKind, key: &str) -> Option<&MemoryItem> {
        let key = key.trim().to_lowercase();
        self.items
            .iter()
            .find(|i| i.kind == kind && i.key.trim().to_lowercase() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub kind: MemoryItemKind,
    pub key: String,
    pub value: String,
    pub confidence: f32,
    pub updated_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(kind: MemoryItemKind, key: String, value: String, confidence: f32) -> Self {
        Self {
            kind,
            key,
            value,
            confidence: clamp_confidence(confidence),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryItemKind {
    Preference,
    Pattern,
    Context,
    Expertise,
}

impl std::fmt::Display for MemoryItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preference => write!(f, "preference"),
            Self::Pattern => write!(f, "pattern"),
            Self::Context => write!(f, "context"),
            Self::Expertise => write!(f, "expertise"),
        }
    }
}

impl std::str::FromStr for MemoryItemKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preference" | "preferences" => Ok(Self::Preference),
            "pattern" | "patterns" => Ok(Self::Pattern),
            "context" => Ok(Self::Context),
            "expertise" | "skill" => Ok(Self::Expertise),
            _ => Err(format!("unknown memory item kind: {s}")),
        }
    }
}

/// Changes to apply to a [`UserMemory`], usually produced by the analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDelta {
    /// Replacement free text. `None` keeps the current text.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub items: Vec<MemoryItem>,
    /// Keys (any kind) the user asked to forget.
    #[serde(default)]
    pub remove_keys: Vec<String>,
}

impl MemoryDelta {
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, |c| c.trim().is_empty())
            && self.items.is_empty()
            && self.remove_keys.is_empty()
    }
}

/// One entry of the append-only memory audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub id: Uuid,
    pub user_id: String,
    pub update_type: UpdateType,
    pub change_summary: String,
    pub delta: serde_json::Value,
    pub source_chat_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl MemoryUpdate {
    pub fn new(user_id: String, update_type: UpdateType, change_summary: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            update_type,
            change_summary,
            delta: serde_json::Value::Null,
            source_chat_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_delta(mut self, delta: serde_json::Value) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_source_chat(mut self, chat_id: Option<Uuid>) -> Self {
        self.source_chat_id = chat_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Analysis,
    Manual,
    Reset,
    Trimmed,
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Manual => write!(f, "manual"),
            Self::Reset => write!(f, "reset"),
            Self::Trimmed => write!(f, "trimmed"),
        }
    }
}

impl std::str::FromStr for UpdateType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "analysis" => Ok(Self::Analysis),
            "manual" => Ok(Self::Manual),
            "reset" => Ok(Self::Reset),
            "trimmed" => Ok(Self::Trimmed),
            _ => Err(format!("unknown update type: {s}")),
        }
    }
}
