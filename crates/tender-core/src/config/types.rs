use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub summary: SummaryConfig,
    pub batch: BatchConfig,
    pub extract: ExtractConfig,
}

#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: Option<String>,
    /// Group chats the bot may work in. Empty allows every chat.
    pub allowed_chats: Vec<i64>,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("allowed_chats", &self.allowed_chats)
            .finish()
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4.1-mini".into()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

pub const MIN_MAX_DOC_CHARS: usize = 1_000;
pub const MIN_CHUNK_SIZE: usize = 2_000;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub language: String,
    /// Payload is truncated to this many characters before chunking.
    pub max_doc_chars: usize,
    pub chunk_size: usize,
    /// Clamped to `chunk_size / 2`.
    pub chunk_overlap: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            language: "ru".into(),
            max_doc_chars: 120_000,
            chunk_size: 12_000,
            chunk_overlap: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Idle time after the last document before a batch is finalized.
    pub idle_window_ms: u64,
    /// Upper bound on a batch's lifetime counted from its first document.
    pub max_span_ms: u64,
    pub context_max_age_secs: u64,
    pub context_history_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            idle_window_ms: 2_000,
            max_span_ms: 60_000,
            context_max_age_secs: 30 * 60,
            context_history_size: 30,
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn idle_window(&self) -> Duration {
        Duration::from_millis(self.idle_window_ms)
    }

    #[must_use]
    pub fn max_span(&self) -> Duration {
        Duration::from_millis(self.max_span_ms)
    }

    #[must_use]
    pub fn context_max_age(&self) -> Duration {
        Duration::from_secs(self.context_max_age_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub tool_timeout_secs: u64,
    pub max_archive_entries: usize,
    /// `.doc` converters in preference order.
    pub converters: Vec<String>,
    /// Archivers in preference order.
    pub archivers: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 120,
            max_archive_entries: 30,
            converters: ["soffice", "antiword", "catdoc"].map(String::from).to_vec(),
            archivers: ["unrar", "7z", "7za", "bsdtar", "unar"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl ExtractConfig {
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}
