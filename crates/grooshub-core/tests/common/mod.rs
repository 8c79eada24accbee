#![allow(dead_code)]

use httpmock::MockServer;
use uuid::Uuid;

use grooshub_core::config::{LlmConfig, RetryConfig};
use grooshub_core::crypto::Encryptor;
use grooshub_core::llm::LlmService;
use grooshub_core::model::{ChatMessage, MessageRole, NewMessage};
use grooshub_core::storage::{append_chat_messages, SqliteStorage};

pub const ORG: &str = "org-utrecht";
pub const USER: &str = "user-42";
pub const PROJECT: &str = "project-blok-a";

pub fn encryptor() -> Encryptor {
    Encryptor::with_master_key("integration-test-master-key", 1_000).expect("encryptor")
}

/// An OpenAI-flavoured service pointed at the mock server, with fast retries.
pub fn llm_for(server: &MockServer) -> LlmService {
    let config = LlmConfig {
        enabled: true,
        provider: "openai".into(),
        model: "gpt-4o-mini".into(),
        api_key: Some("sk-test".into()),
        base_url: Some(server.base_url()),
        timeout_secs: 5,
        ..Default::default()
    };
    let retry = RetryConfig {
        max_retries: 1,
        base_delay_ms: 1,
    };
    LlmService::with_retry_config(&config, &retry).expect("llm service")
}

/// Wrap `content` the way the chat completions endpoint does.
pub fn openai_reply(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
}

pub fn analysis_json() -> String {
    serde_json::json!({
        "summary": "De gebruiker vergeleek twee betonmengsels voor Blok A en koos CEM III.",
        "memory": {
            "content": "Sustainability advisor at a municipality.",
            "items": [
                {"kind": "preference", "key": "language", "value": "Dutch", "confidence": 0.9},
                {"kind": "expertise", "key": "LCA", "value": "advanced", "confidence": 0.7}
            ],
            "forget": []
        },
        "project": {
            "hard_values": {"gross_floor_area_m2": 12500},
            "soft_context": [
                {"category": "goal", "text": "MPG below 0.8", "confidence": 0.8}
            ]
        }
    })
    .to_string()
}

/// Append `n` alternating user/assistant messages to a chat.
pub async fn seed_messages(storage: &SqliteStorage, chat_id: Uuid, n: usize) -> Vec<ChatMessage> {
    let messages = (0..n)
        .map(|i| NewMessage {
            role: if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            },
            content: format!("Turn {i}: what is the MPG effect of concrete option {i}?"),
            created_at: None,
        })
        .collect();
    append_chat_messages(storage, chat_id, messages)
        .await
        .expect("seed messages")
}
