mod backend;
mod rows;
mod sqlite;

pub use backend::StorageBackend;
pub use rows::*;
pub use sqlite::SqliteStorage;

use std::path::PathBuf;

use uuid::Uuid;

use crate::config::GroosHubConfig;
use crate::error::{GroosHubError, Result};
use crate::model::{validate_message_content, ChatMessage, NewMessage};

/// Open the storage configured in `config`.
pub fn create_backend(config: &GroosHubConfig) -> Result<SqliteStorage> {
    let path = match &config.storage.path {
        Some(p) => PathBuf::from(p),
        None => default_sqlite_path()?,
    };
    SqliteStorage::open(&path)
}

/// Default SQLite path: `~/.config/grooshub/memory.db`
pub fn default_sqlite_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("grooshub").join("memory.db"))
        .ok_or_else(|| GroosHubError::Config("cannot determine config directory".to_string()))
}

/// Validate and append messages to the end of a chat, assigning positions
/// after the last stored message.
pub async fn append_chat_messages(
    storage: &impl StorageBackend,
    chat_id: Uuid,
    messages: Vec<NewMessage>,
) -> Result<Vec<ChatMessage>> {
    for m in &messages {
        validate_message_content(&m.content)?;
    }
    let start = storage.count_messages(chat_id).await?;
    let stored: Vec<ChatMessage> = messages
        .into_iter()
        .enumerate()
        .map(|(offset, m)| {
            let message = ChatMessage::new(chat_id, start + offset, m.role, m.content);
            match m.created_at {
                Some(at) => message.with_created_at(at),
                None => message,
            }
        })
        .collect();
    if !stored.is_empty() {
        storage.append_messages(&stored).await?;
        tracing::debug!(%chat_id, from = start, count = stored.len(), "appended messages");
    }
    Ok(stored)
}
