mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::{Path, PathBuf};

use tender_extract::archive::KNOWN_ARCHIVERS;
use tender_extract::converter::KNOWN_CONVERTERS;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist. Size limits are
    /// raised to their minimums and the chunk overlap is clamped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<Self>(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.clamp_limits();
        Ok(config)
    }

    fn clamp_limits(&mut self) {
        let summary = &mut self.summary;
        summary.max_doc_chars = summary.max_doc_chars.max(MIN_MAX_DOC_CHARS);
        summary.chunk_size = summary.chunk_size.max(MIN_CHUNK_SIZE);
        summary.chunk_overlap = summary.chunk_overlap.min(summary.chunk_size / 2);
    }

    /// Check settings that have no usable default.
    ///
    /// # Errors
    ///
    /// `Missing` for absent secrets, `Invalid` for zero or inconsistent
    /// windows and unknown tool names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.token.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("telegram.token (TENDER_TELEGRAM_TOKEN)"));
        }
        if self.llm.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("llm.api_key (TENDER_OPENAI_API_KEY)"));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("llm.base_url"));
        }
        if self.batch.idle_window_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "batch.idle_window_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.batch.max_span_ms < self.batch.idle_window_ms {
            return Err(ConfigError::Invalid {
                field: "batch.max_span_ms",
                reason: format!(
                    "must be at least batch.idle_window_ms ({})",
                    self.batch.idle_window_ms
                ),
            });
        }
        if self.batch.context_history_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch.context_history_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.extract.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "extract.tool_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(name) = self
            .extract
            .converters
            .iter()
            .find(|n| !KNOWN_CONVERTERS.contains(&n.as_str()))
        {
            return Err(ConfigError::Invalid {
                field: "extract.converters",
                reason: format!("unknown converter {name:?}, expected one of {KNOWN_CONVERTERS:?}"),
            });
        }
        if let Some(name) = self
            .extract
            .archivers
            .iter()
            .find(|n| !KNOWN_ARCHIVERS.contains(&n.as_str()))
        {
            return Err(ConfigError::Invalid {
                field: "extract.archivers",
                reason: format!("unknown archiver {name:?}, expected one of {KNOWN_ARCHIVERS:?}"),
            });
        }
        Ok(())
    }
}
