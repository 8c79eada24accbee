use uuid::Uuid;

use super::rows::*;
use crate::error::Result;
use crate::model::ChatMessage;

/// Abstract storage backend for the memory pipeline.
///
/// Rows carry payloads exactly as persisted; encryption and decryption
/// happen in the stores above this trait.
pub trait StorageBackend: Send + Sync {
    // -- Chat messages --

    fn append_messages(
        &self,
        messages: &[ChatMessage],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Messages of a chat with `index >= from_index`, ordered by index.
    fn get_messages(
        &self,
        chat_id: Uuid,
        from_index: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>>> + Send;

    fn count_messages(&self, chat_id: Uuid)
        -> impl std::future::Future<Output = Result<usize>> + Send;

    // -- Summaries --

    fn save_summary(&self, row: &SummaryRow)
        -> impl std::future::Future<Output = Result<()>> + Send;

    /// Summaries of a chat ordered by `start_index`.
    fn list_summaries(
        &self,
        chat_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<SummaryRow>>> + Send;

    fn delete_summaries(
        &self,
        chat_id: Uuid,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;

    // -- User memory --

    fn get_user_memory(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<UserMemoryRow>>> + Send;

    fn save_user_memory(
        &self,
        row: &UserMemoryRow,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn delete_user_memory(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    // -- Audit log --

    fn append_memory_update(
        &self,
        row: &MemoryUpdateRow,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Most recent first.
    fn list_memory_updates(
        &self,
        user_id: &str,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<MemoryUpdateRow>>> + Send;

    // -- Project memory --

    fn get_project_memory(
        &self,
        project_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ProjectMemoryRow>>> + Send;

    fn save_project_memory(
        &self,
        row: &ProjectMemoryRow,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    // -- Analysis marks --

    /// Index of the last message of `chat_id` that was analyzed for the
    /// user's memory.
    fn get_analysis_mark(
        &self,
        user_id: &str,
        chat_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<usize>>> + Send;

    /// Record that messages up to `last_index` were analyzed. Never moves
    /// the mark backwards.
    fn save_analysis_mark(
        &self,
        user_id: &str,
        chat_id: Uuid,
        last_index: usize,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}
