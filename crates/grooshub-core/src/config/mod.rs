use crate::error::{GroosHubError, Result};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroosHubConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom path for the SQLite database. Defaults to `~/.config/grooshub/memory.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub env_var: Option<String>,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            env_var: None,
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

/// At-rest encryption of summaries and memory payloads.
///
/// Without a resolvable master key the pipeline stores plaintext and marks
/// every record as unencrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Master secret. Prefer the environment variable over putting it in a file.
    #[serde(default)]
    pub master_key: Option<String>,
    /// Environment variable holding the master secret (default `GROOSHUB_ENCRYPTION_KEY`).
    #[serde(default)]
    pub env_var: Option<String>,
    /// PBKDF2 iteration count for per-organization key derivation.
    #[serde(default = "default_kdf_iterations")]
    pub iterations: u32,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            master_key: None,
            env_var: None,
            iterations: default_kdf_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Soft cap on the formatted user memory, in estimated tokens.
    #[serde(default = "default_memory_max_tokens")]
    pub max_tokens: usize,
    /// User messages required before the very first memory analysis.
    #[serde(default = "default_min_messages_first")]
    pub min_messages_first: usize,
    /// User messages since the last analysis that trigger a new one.
    #[serde(default = "default_update_interval_messages")]
    pub update_interval_messages: usize,
    /// Items below this confidence are pruned after a merge.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Maximum soft-context entries kept per project.
    #[serde(default = "default_max_project_context")]
    pub max_project_context: usize,
    /// Extra phrases (case-insensitive) that force a memory update.
    #[serde(default)]
    pub trigger_phrases: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_memory_max_tokens(),
            min_messages_first: default_min_messages_first(),
            update_interval_messages: default_update_interval_messages(),
            min_confidence: default_min_confidence(),
            max_project_context: default_max_project_context(),
            trigger_phrases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// Unsummarized messages (outside the recent window) needed to summarize.
    #[serde(default = "default_trigger_messages")]
    pub trigger_messages: usize,
    /// Most recent messages that are never summarized.
    #[serde(default = "default_keep_recent")]
    pub keep_recent: usize,
    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: usize,
    /// Transcript tokens sent per summarization call. Longer backlogs are
    /// summarized over several runs.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            trigger_messages: default_trigger_messages(),
            keep_recent: default_keep_recent(),
            max_summary_tokens: default_max_summary_tokens(),
            max_input_tokens: default_max_input_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_token_budget")]
    pub token_budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_context_token_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Valid LLM provider names.
pub const VALID_LLM_PROVIDERS: &[&str] = &["ollama", "openai", "gemini", "anthropic", "claude"];

/// Lowest PBKDF2 iteration count accepted by `validate`.
pub const MIN_KDF_ITERATIONS: u32 = 10_000;

// -- Defaults --

fn default_true() -> bool {
    true
}
fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_max_tokens() -> usize {
    1500
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_kdf_iterations() -> u32 {
    100_000
}
fn default_memory_max_tokens() -> usize {
    500
}
fn default_min_messages_first() -> usize {
    3
}
fn default_update_interval_messages() -> usize {
    10
}
fn default_min_confidence() -> f32 {
    0.3
}
fn default_max_project_context() -> usize {
    50
}
fn default_trigger_messages() -> usize {
    20
}
fn default_keep_recent() -> usize {
    10
}
fn default_max_summary_tokens() -> usize {
    400
}
fn default_max_input_tokens() -> usize {
    8000
}
fn default_context_token_budget() -> usize {
    4000
}
fn default_max_retries() -> usize {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}

impl GroosHubConfig {
    /// Load configuration with three-layer TOML merge:
    /// 1. ~/.config/grooshub/config.toml (global)
    /// 2. .grooshub/config.toml (project)
    /// 3. .grooshub/config.local.toml (local, gitignored)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                builder = builder.add_source(File::from(global_path).required(false));
            }
        }

        if let Some(dir) = project_dir {
            let project_config = dir.join(".grooshub").join("config.toml");
            if project_config.exists() {
                builder = builder.add_source(File::from(project_config).required(false));
            }

            let local_config = dir.join(".grooshub").join("config.local.toml");
            if local_config.exists() {
                builder = builder.add_source(File::from(local_config).required(false));
            }
        }

        let config = builder
            .build()
            .map_err(|e| GroosHubError::Config(e.to_string()))?;

        let mut cfg: Self = config
            .try_deserialize()
            .map_err(|e| GroosHubError::Config(e.to_string()))?;

        cfg.validate();
        Ok(cfg)
    }

    /// Load with defaults only (no files).
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate config values, clamping out-of-range values and logging warnings.
    /// Lenient: values are fixed rather than the config rejected.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.llm.enabled && !VALID_LLM_PROVIDERS.contains(&self.llm.provider.as_str()) {
            warnings.push(format!(
                "unknown LLM provider '{}', valid: {}",
                self.llm.provider,
                VALID_LLM_PROVIDERS.join(", ")
            ));
        }

        if self.llm.max_tokens == 0 {
            warnings.push("llm.max_tokens = 0, setting to 256".to_string());
            self.llm.max_tokens = 256;
        }
        if self.llm.timeout_secs == 0 {
            warnings.push("llm.timeout_secs = 0, setting to 60".to_string());
            self.llm.timeout_secs = default_llm_timeout_secs();
        }

        if self.encryption.iterations < MIN_KDF_ITERATIONS {
            warnings.push(format!(
                "encryption.iterations = {} below minimum, setting to {MIN_KDF_ITERATIONS}",
                self.encryption.iterations
            ));
            self.encryption.iterations = MIN_KDF_ITERATIONS;
        }

        let confidence = self.memory.min_confidence;
        if confidence.is_nan() || !(0.0..=1.0).contains(&confidence) {
            warnings.push(format!(
                "memory.min_confidence = {confidence} out of range [0.0, 1.0], clamping"
            ));
            self.memory.min_confidence = if confidence.is_nan() {
                default_min_confidence()
            } else {
                confidence.clamp(0.0, 1.0)
            };
        }

        let positive_checks: Vec<(&str, &mut usize, usize)> = vec![
            ("memory.max_tokens", &mut self.memory.max_tokens, 50),
            (
                "memory.min_messages_first",
                &mut self.memory.min_messages_first,
                1,
            ),
            (
                "memory.update_interval_messages",
                &mut self.memory.update_interval_messages,
                1,
            ),
            (
                "memory.max_project_context",
                &mut self.memory.max_project_context,
                1,
            ),
            (
                "summarization.trigger_messages",
                &mut self.summarization.trigger_messages,
                1,
            ),
            (
                "summarization.max_summary_tokens",
                &mut self.summarization.max_summary_tokens,
                32,
            ),
            (
                "summarization.max_input_tokens",
                &mut self.summarization.max_input_tokens,
                256,
            ),
            ("context.token_budget", &mut self.context.token_budget, 256),
        ];
        for (name, val, min) in positive_checks {
            if *val < min {
                warnings.push(format!("{name} = {val} too small, setting to {min}"));
                *val = min;
            }
        }

        if self.summarization.max_summary_tokens > self.context.token_budget {
            warnings.push(format!(
                "summarization.max_summary_tokens ({}) exceeds context.token_budget ({}), clamping",
                self.summarization.max_summary_tokens, self.context.token_budget
            ));
            self.summarization.max_summary_tokens = self.context.token_budget;
        }

        for w in &warnings {
            tracing::warn!("config: {}", w);
        }

        warnings
    }

    /// Render the defaults as a TOML template for `grooshub init`.
    pub fn template() -> Result<String> {
        toml::to_string_pretty(&Self::default())
            .map_err(|e| GroosHubError::Config(format!("failed to render config template: {e}")))
    }
}

/// Path to the global config file: `~/.config/grooshub/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}

/// Directory holding GroosHub's global state: `~/.config/grooshub`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("grooshub"))
}
