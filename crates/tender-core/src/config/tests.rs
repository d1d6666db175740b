use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 11] = [
    "TENDER_TELEGRAM_TOKEN",
    "TENDER_ALLOWED_CHATS",
    "TENDER_OPENAI_API_KEY",
    "TENDER_LLM_BASE_URL",
    "TENDER_LLM_MODEL",
    "TENDER_SUMMARY_LANGUAGE",
    "TENDER_MAX_DOC_CHARS",
    "TENDER_CHUNK_SIZE",
    "TENDER_CHUNK_OVERLAP",
    "TENDER_BATCH_IDLE_WINDOW_MS",
    "TENDER_TOOL_TIMEOUT_SECS",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn valid() -> Config {
    let mut config = Config::default();
    config.telegram.token = Some("123:abc".into());
    config.llm.api_key = Some("sk-test".into());
    config
}

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.llm.model, "gpt-4.1-mini");
    assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    assert!((config.llm.temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(config.summary.language, "ru");
    assert_eq!(config.summary.max_doc_chars, 120_000);
    assert_eq!(config.summary.chunk_size, 12_000);
    assert_eq!(config.summary.chunk_overlap, 1_000);
    assert_eq!(config.batch.idle_window_ms, 2_000);
    assert_eq!(config.batch.context_max_age_secs, 1_800);
    assert_eq!(config.batch.context_history_size, 30);
    assert_eq!(config.extract.tool_timeout_secs, 120);
    assert_eq!(config.extract.max_archive_entries, 30);
    assert_eq!(config.extract.converters, ["soffice", "antiword", "catdoc"]);
    assert_eq!(
        config.extract.archivers,
        ["unrar", "7z", "7za", "bsdtar", "unar"]
    );
    assert!(config.telegram.allowed_chats.is_empty());
}

#[test]
#[serial]
fn missing_file_uses_defaults() {
    clear_env();
    let config = Config::load(Path::new("/nonexistent/tender.toml")).unwrap();
    assert_eq!(config.batch.max_span_ms, 60_000);
    assert!(config.telegram.token.is_none());
}

#[test]
#[serial]
fn parse_valid_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tender.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(
        f,
        r#"
[telegram]
token = "1:file"
allowed_chats = [-1001, -1002]

[llm]
model = "gpt-4o-mini"

[batch]
idle_window_ms = 3000

[extract]
converters = ["antiword"]
"#
    )
    .unwrap();

    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.telegram.token.as_deref(), Some("1:file"));
    assert_eq!(config.telegram.allowed_chats, [-1001, -1002]);
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert_eq!(config.llm.max_tokens, 4096);
    assert_eq!(config.batch.idle_window_ms, 3000);
    assert_eq!(config.batch.max_span_ms, 60_000);
    assert_eq!(config.extract.converters, ["antiword"]);
    assert_eq!(config.extract.archivers.len(), 5);
}

#[test]
#[serial]
fn malformed_toml_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[batch\nidle_window_ms = ").unwrap();
    clear_env();

    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
#[serial]
fn env_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tender.toml");
    std::fs::write(&path, "[telegram]\ntoken = \"file\"\n").unwrap();

    clear_env();
    unsafe {
        std::env::set_var("TENDER_TELEGRAM_TOKEN", " env-token ");
        std::env::set_var("TENDER_OPENAI_API_KEY", "sk-env");
        std::env::set_var("TENDER_ALLOWED_CHATS", "-100, 42");
        std::env::set_var("TENDER_LLM_MODEL", "gpt-4.1");
        std::env::set_var("TENDER_CHUNK_SIZE", "5000");
        std::env::set_var("TENDER_BATCH_IDLE_WINDOW_MS", "1500");
    }

    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.telegram.token.as_deref(), Some("env-token"));
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-env"));
    assert_eq!(config.telegram.allowed_chats, [-100, 42]);
    assert_eq!(config.llm.model, "gpt-4.1");
    assert_eq!(config.summary.chunk_size, 5000);
    assert_eq!(config.batch.idle_window_ms, 1500);
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("TENDER_ALLOWED_CHATS", "abc");
        std::env::set_var("TENDER_MAX_DOC_CHARS", "lots");
    }
    let config = Config::load(Path::new("/nonexistent/tender.toml")).unwrap();
    clear_env();

    assert!(config.telegram.allowed_chats.is_empty());
    assert_eq!(config.summary.max_doc_chars, 120_000);
}

#[test]
#[serial]
fn limits_are_clamped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tender.toml");
    std::fs::write(
        &path,
        "[summary]\nmax_doc_chars = 10\nchunk_size = 100\nchunk_overlap = 5000\n",
    )
    .unwrap();
    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.summary.max_doc_chars, MIN_MAX_DOC_CHARS);
    assert_eq!(config.summary.chunk_size, MIN_CHUNK_SIZE);
    assert_eq!(config.summary.chunk_overlap, MIN_CHUNK_SIZE / 2);
}

#[test]
fn validate_accepts_complete_config() {
    assert!(valid().validate().is_ok());
}

#[test]
fn validate_requires_secrets() {
    let mut config = valid();
    config.telegram.token = Some(String::new());
    assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

    let mut config = valid();
    config.llm.api_key = None;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("TENDER_OPENAI_API_KEY"));
}

#[test]
fn validate_rejects_zero_window_and_short_span() {
    let mut config = valid();
    config.batch.idle_window_ms = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Invalid {
            field: "batch.idle_window_ms",
            ..
        })
    ));

    let mut config = valid();
    config.batch.max_span_ms = 1_000;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Invalid {
            field: "batch.max_span_ms",
            ..
        })
    ));
}

#[test]
fn validate_rejects_unknown_tools() {
    let mut config = valid();
    config.extract.converters.push("wordpad".into());
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("wordpad"));

    let mut config = valid();
    config.extract.archivers = vec!["winrar".into()];
    assert!(matches!(
        config.validate(),
        Err(ConfigError::Invalid {
            field: "extract.archivers",
            ..
        })
    ));
}

#[test]
fn debug_redacts_secrets() {
    let dbg = format!("{:?}", valid());
    assert!(!dbg.contains("123:abc"));
    assert!(!dbg.contains("sk-test"));
    assert!(dbg.contains("<redacted>"));
}
