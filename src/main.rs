use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tender_channels::TelegramBot;
use tender_core::config::Config;
use tender_core::{CorrelatorSettings, LlmSummarizer, RecentTextHistory};
use tender_extract::{ArchiveExpander, ConverterChain, DocumentNormalizer, FormatExtractor};
use tender_llm::OpenAiProvider;

/// How long to wait for in-flight batches after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let config_path = resolve_config_path();
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    config.validate().context("invalid configuration")?;

    let provider = create_provider(&config)?;
    let normalizer = create_normalizer(&config);
    let history = Arc::new(RecentTextHistory::new(
        config.batch.context_history_size,
        config.batch.context_max_age(),
    ));

    tracing::info!(
        config = %config_path.display(),
        model = provider.model(),
        language = %config.summary.language,
        allowed_chats = config.telegram.allowed_chats.len(),
        "tenderbot starting"
    );

    let token = config.telegram.token.as_deref().unwrap_or_default();
    let bot = TelegramBot::new(
        token,
        &config.telegram.allowed_chats,
        normalizer,
        LlmSummarizer::new(provider, config.summary.clone()),
        history,
        CorrelatorSettings::from(&config.batch),
    )
    .context("failed to create telegram bot")?;

    bot.run(SHUTDOWN_GRACE).await;
    tracing::info!("tenderbot stopped");
    Ok(())
}

fn create_provider(config: &Config) -> anyhow::Result<OpenAiProvider> {
    let api_key = config
        .llm
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .context("llm.api_key is not set (TENDER_OPENAI_API_KEY)")?;
    Ok(OpenAiProvider::new(
        api_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.max_tokens,
        config.llm.temperature,
    ))
}

/// Probe the configured converters and archivers once at startup.
fn create_normalizer(config: &Config) -> DocumentNormalizer {
    let timeout = config.extract.tool_timeout();
    let converters = ConverterChain::probe(&config.extract.converters, timeout);
    let archives = ArchiveExpander::probe(&config.extract.archivers, timeout);
    tracing::info!(
        converters = converters.converters().len(),
        archivers = archives.archivers().len(),
        "extraction tools probed"
    );

    DocumentNormalizer::new(FormatExtractor::new(converters), archives)
        .with_max_archive_entries(config.extract.max_archive_entries)
}

fn resolve_config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    if let Some(path) = args.windows(2).find(|w| w[0] == "--config").map(|w| &w[1]) {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("TENDER_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/tender.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn config_path_from_env() {
        unsafe { std::env::set_var("TENDER_CONFIG", "/etc/tender/custom.toml") };
        let path = resolve_config_path();
        unsafe { std::env::remove_var("TENDER_CONFIG") };
        assert_eq!(path, PathBuf::from("/etc/tender/custom.toml"));
    }

    #[test]
    #[serial]
    fn config_path_default() {
        unsafe { std::env::remove_var("TENDER_CONFIG") };
        assert_eq!(resolve_config_path(), PathBuf::from("config/tender.toml"));
    }

    #[test]
    fn provider_requires_api_key() {
        let mut config = Config::default();
        config.llm.api_key = None;
        let err = create_provider(&config).unwrap_err();
        assert!(err.to_string().contains("TENDER_OPENAI_API_KEY"));
    }

    #[test]
    fn provider_uses_configured_model() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-test".into());
        config.llm.model = "gpt-4o-mini".into();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model(), "gpt-4o-mini");
    }
}
