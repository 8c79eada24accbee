use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GroosHubError, Result};

pub const MAX_MESSAGE_LENGTH: usize = 200_000;

/// Validate the content of a message before it is stored.
pub fn validate_message_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(GroosHubError::InvalidInput(
            "message content cannot be empty".into(),
        ));
    }
    if content.len() > MAX_MESSAGE_LENGTH {
        return Err(GroosHubError::InvalidInput(format!(
            "message content exceeds maximum length of {MAX_MESSAGE_LENGTH} bytes"
        )));
    }
    Ok(())
}

/// One turn of a chat. `index` is the 0-based position inside the chat and
/// is what summaries refer to when they record the range they replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub index: usize,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(chat_id: Uuid, index: usize, role: MessageRole, content: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            chat_id,
            index,
            role,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    /// `role: content` line used when feeding transcripts to the LLM.
    pub fn transcript_line(&self) -> String {
        format!("[{}] {}: {}", self.index, self.role, self.content.trim())
    }
}

/// A message as supplied by callers (import files, chat handlers) before
/// it receives an id and position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            _ => Err(format!("unknown message role: {s}")),
        }
    }
}
