use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::{LlmConfig, RetryConfig};
use crate::error::{GroosHubError, Result};
use crate::retry::with_retry;

/// Chat-completion client for the conversation analyzer.
pub struct LlmService {
    provider: LlmProvider,
    config: LlmConfig,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for LlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmService")
            .field("provider", &self.provider)
            .field("model", &self.config.model)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LlmProvider {
    Ollama,
    OpenAI,
    Gemini,
    Anthropic,
}

impl LlmProvider {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(GroosHubError::Config(format!(
                "unknown LLM provider: '{other}' (expected 'ollama', 'openai', 'gemini', or 'anthropic')"
            ))),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ollama => "Ollama",
            Self::OpenAI => "OpenAI",
            Self::Gemini => "Gemini",
            Self::Anthropic => "Anthropic",
        }
    }

    fn default_key_env(self) -> Option<&'static str> {
        match self {
            Self::Ollama => None,
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }
}

impl LlmService {
    /// Create an LLM service from configuration. Providers that need an API
    /// key fail here when none resolves.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Self::with_retry_config(config, &RetryConfig::default())
    }

    pub fn with_retry_config(config: &LlmConfig, retry: &RetryConfig) -> Result<Self> {
        let provider = LlmProvider::parse(&config.provider)?;
        if let Some(env) = provider.default_key_env() {
            resolve_api_key(config, env)?;
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| GroosHubError::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider,
            config: config.clone(),
            retry: retry.clone(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Generate text from a prompt with an optional system message.
    /// Transient failures are retried with exponential backoff.
    pub async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        with_retry(self.retry.max_retries, self.retry.base_delay_ms, || {
            self.generate_once(prompt, system)
        })
        .await
    }

    /// Generate and parse a JSON object response into `T`.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<T> {
        let text = self.generate(prompt, system).await?;
        parse_json_response(&text)
    }

    async fn generate_once(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let (request, pointer) = match self.provider {
            LlmProvider::Ollama => (self.ollama_request(prompt, system), "/response"),
            LlmProvider::OpenAI => (
                self.openai_request(prompt, system)?,
                "/choices/0/message/content",
            ),
            LlmProvider::Gemini => (
                self.gemini_request(prompt, system)?,
                "/candidates/0/content/parts/0/text",
            ),
            LlmProvider::Anthropic => (self.anthropic_request(prompt, system)?, "/content/0/text"),
        };
        let label = self.provider.label();

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(GroosHubError::Llm(format!("{label} error {status}: {text}")));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GroosHubError::Llm(format!("{label} response parse error: {e}")))?;

        json.pointer(pointer)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| GroosHubError::Llm(format!("{label} response missing text content")))
    }

    fn base_url(&self, default: &str) -> String {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    /// Ollama: POST {base_url}/api/generate
    fn ollama_request(&self, prompt: &str, system: Option<&str>) -> reqwest::RequestBuilder {
        let url = format!("{}/api/generate", self.base_url("http://localhost:11434"));
        let mut body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "num_predict": self.config.max_tokens },
        });
        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys.to_string());
        }
        self.client.post(url).json(&body)
    }

    /// OpenAI: POST {base_url}/v1/chat/completions
    fn openai_request(&self, prompt: &str, system: Option<&str>) -> Result<reqwest::RequestBuilder> {
        let api_key = resolve_api_key(&self.config, "OPENAI_API_KEY")?;
        let url = format!("{}/v1/chat/completions", self.base_url("https://api.openai.com"));

        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(serde_json::json!({"role": "system", "content": sys}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": 0.2,
        });
        Ok(self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body))
    }

    /// Anthropic: POST {base_url}/v1/messages
    fn anthropic_request(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<reqwest::RequestBuilder> {
        let api_key = resolve_api_key(&self.config, "ANTHROPIC_API_KEY")?;
        let url = format!("{}/v1/messages", self.base_url("https://api.anthropic.com"));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys.to_string());
        }
        Ok(self
            .client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body))
    }

    /// Gemini: POST {base_url}/v1beta/models/{model}:generateContent
    fn gemini_request(&self, prompt: &str, system: Option<&str>) -> Result<reqwest::RequestBuilder> {
        let api_key = resolve_api_key(&self.config, "GEMINI_API_KEY")?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url("https://generativelanguage.googleapis.com"),
            self.config.model,
        );

        let mut body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "maxOutputTokens": self.config.max_tokens,
                "responseMimeType": "application/json",
            }
        });
        if let Some(sys) = system {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": sys}]});
        }
        Ok(self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&body))
    }
}

/// Resolve an API key from config, a custom env var, or a default env var.
fn resolve_api_key(config: &LlmConfig, default_env_var: &str) -> Result<String> {
    if let Some(ref key) = config.api_key {
        if !key.is_empty() {
            return Ok(key.clone());
        }
    }

    let env_var_name = config.env_var.as_deref().unwrap_or(default_env_var);

    std::env::var(env_var_name).map_err(|_| {
        GroosHubError::Config(format!(
            "{} LLM provider requires an API key (set llm.api_key or {})",
            config.provider, env_var_name
        ))
    })
}

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// The outermost `{...}` object in `text`, skipping braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a model response that should contain one JSON object.
pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T> {
    let body = strip_code_fences(text);
    let json = extract_json_object(body).ok_or_else(|| {
        GroosHubError::Llm(format!(
            "LLM response contains no JSON object: {}",
            preview(body)
        ))
    })?;
    serde_json::from_str(json)
        .map_err(|e| GroosHubError::Llm(format!("LLM response is not valid JSON: {e}")))
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(120).collect();
    if out.len() < text.len() {
        out.push_str("...");
    }
    out
}
