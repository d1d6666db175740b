use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TENDER_TELEGRAM_TOKEN") {
            self.telegram.token = Some(v.trim().to_owned());
        }
        if let Ok(v) = std::env::var("TENDER_ALLOWED_CHATS") {
            let parsed: Result<Vec<i64>, _> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse::<i64>)
                .collect();
            match parsed {
                Ok(ids) => self.telegram.allowed_chats = ids,
                Err(_) => tracing::warn!("ignoring invalid TENDER_ALLOWED_CHATS value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("TENDER_OPENAI_API_KEY") {
            self.llm.api_key = Some(v.trim().to_owned());
        }
        if let Ok(v) = std::env::var("TENDER_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("TENDER_LLM_MODEL")
            && !v.trim().is_empty()
        {
            self.llm.model = v.trim().to_owned();
        }
        if let Ok(v) = std::env::var("TENDER_SUMMARY_LANGUAGE")
            && !v.trim().is_empty()
        {
            self.summary.language = v.trim().to_owned();
        }
        if let Ok(v) = std::env::var("TENDER_MAX_DOC_CHARS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.summary.max_doc_chars = n;
        }
        if let Ok(v) = std::env::var("TENDER_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.summary.chunk_size = n;
        }
        if let Ok(v) = std::env::var("TENDER_CHUNK_OVERLAP")
            && let Ok(n) = v.parse::<usize>()
        {
            self.summary.chunk_overlap = n;
        }
        if let Ok(v) = std::env::var("TENDER_BATCH_IDLE_WINDOW_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.batch.idle_window_ms = ms;
        }
        if let Ok(v) = std::env::var("TENDER_TOOL_TIMEOUT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.extract.tool_timeout_secs = secs;
        }
    }
}
