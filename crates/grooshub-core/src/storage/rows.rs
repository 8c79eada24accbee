use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::UpdateType;

/// A persisted [`crate::model::ChatSummary`]; `summary` may be ciphertext.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub org_id: String,
    pub start_index: usize,
    pub end_index: usize,
    pub summary: String,
    pub is_encrypted: bool,
    pub original_tokens: usize,
    pub summary_tokens: usize,
    pub compression_ratio: f32,
    pub created_at: DateTime<Utc>,
}

/// A persisted user memory. `payload` is the JSON of content + items.
#[derive(Debug, Clone)]
pub struct UserMemoryRow {
    pub user_id: String,
    pub org_id: String,
    pub payload: String,
    pub is_encrypted: bool,
    pub token_count: usize,
    pub last_analysis_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MemoryUpdateRow {
    pub id: Uuid,
    pub user_id: String,
    pub org_id: String,
    pub update_type: UpdateType,
    pub change_summary: String,
    pub delta: String,
    pub is_encrypted: bool,
    pub source_chat_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A persisted project memory. `payload` is the JSON of hard values + soft context.
#[derive(Debug, Clone)]
pub struct ProjectMemoryRow {
    pub project_id: String,
    pub org_id: String,
    pub payload: String,
    pub is_encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
