use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatMemberUpdated, FileMeta, MessageId, ParseMode};
use tender_core::{
    Batch, BatchCorrelator, BatchHandler, BatchKey, BatchOutcome, BatchProcessor, ContextMessage,
    CorrelatorSettings, DocumentSource, RecentTextHistory, Submission, Summarizer,
};
use tender_extract::{Document, DocumentKind, ExtractError, Normalize};

use crate::error::ChannelError;
use crate::format::{MESSAGE_LIMIT, format_summary_html, split_for_telegram};

const START_TEXT: &str = "Бот активен. Пришлите .doc/.docx/.rar в группу. \
Если файлов несколько в одном сообщении, сделаю общее саммари. \
Текст перед пакетом (например ссылка на закупку и цена) тоже учитываю.";
const HELP_TEXT: &str = "Я обрабатываю .doc/.docx/.rar в группе и возвращаю саммари по тендерной документации. \
Для пакета файлов также учитываю последнее текстовое сообщение автора.";
const NOT_ALLOWED_TEXT: &str = "Работа бота в этом чате не разрешена. Бот покидает чат.";
const SINGLE_RECEIVED_TEXT: &str = "Получил документ, извлекаю текст...";
const BATCH_RECEIVED_TEXT: &str = "Получил пакет документов, собираю все файлы...";
const EXTRACTED_TEXT: &str = "Текст извлечен, готовлю саммари...";

const HISTORY_PRUNE_INTERVAL: Duration = Duration::from_secs(300);
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Extract a bot command, dropping any `@botname` suffix.
fn command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    Some(first.split('@').next().unwrap_or(first))
}

/// Sender id for batching; anonymous group admins and channel posts fall
/// back to the chat id.
fn sender_or_chat(user_id: Option<u64>, chat_id: i64) -> i64 {
    user_id
        .and_then(|id| i64::try_from(id).ok())
        .unwrap_or(chat_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Allowed,
    /// `notify` is set the first time a chat is turned away.
    Denied { notify: bool },
}

/// Group chat allow-list. An empty list admits every chat.
#[derive(Debug, Default)]
struct ChatAccess {
    allowed: HashSet<i64>,
    noticed: Mutex<HashSet<i64>>,
}

impl ChatAccess {
    fn new(allowed: impl IntoIterator<Item = i64>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            noticed: Mutex::new(HashSet::new()),
        }
    }

    fn decide(&self, chat_id: i64, is_group: bool) -> Access {
        if !is_group || self.allowed.is_empty() || self.allowed.contains(&chat_id) {
            return Access::Allowed;
        }
        let notify = self
            .noticed
            .lock()
            .map(|mut n| n.insert(chat_id))
            .unwrap_or(false);
        Access::Denied { notify }
    }
}

/// Progress messages posted when a batch starts, one per key.
#[derive(Debug, Default)]
struct StatusBoard {
    messages: Mutex<HashMap<BatchKey, MessageId>>,
}

impl StatusBoard {
    fn contains(&self, key: BatchKey) -> bool {
        self.messages.lock().is_ok_and(|m| m.contains_key(&key))
    }

    fn insert(&self, key: BatchKey, id: MessageId) {
        if let Ok(mut m) = self.messages.lock() {
            m.insert(key, id);
        }
    }

    fn take(&self, key: BatchKey) -> Option<MessageId> {
        self.messages.lock().ok().and_then(|mut m| m.remove(&key))
    }
}

fn telegram_chat(key: BatchKey) -> ChatId {
    ChatId(key.chat.0)
}

/// Delivers finalized batches back to their chat.
#[derive(Debug)]
pub struct TelegramReplier<S> {
    bot: Bot,
    processor: BatchProcessor<S>,
    status: Arc<StatusBoard>,
}

impl<S: Summarizer> TelegramReplier<S> {
    async fn send_html(&self, chat: ChatId, text: &str) {
        for part in split_for_telegram(&format_summary_html(text), MESSAGE_LIMIT) {
            let sent = self
                .bot
                .send_message(chat, &part)
                .parse_mode(ParseMode::Html)
                .await;
            if let Err(e) = sent {
                tracing::warn!(chat_id = chat.0, error = %e, "HTML send failed, retrying as plain text");
                if let Err(e) = self.bot.send_message(chat, &part).await {
                    tracing::error!(chat_id = chat.0, error = %e, "failed to send reply");
                }
            }
        }
    }

    async fn deliver(&self, batch: Batch) {
        let key = batch.key;
        let chat = telegram_chat(key);
        let status = self.status.take(key);

        if let Some(id) = status {
            let _ = self.bot.edit_message_text(chat, id, EXTRACTED_TEXT).await;
        }
        let _ = self.bot.send_chat_action(chat, ChatAction::Typing).await;

        let outcome = self.processor.process(&batch).await;
        let reply = outcome.reply_text();

        match (&outcome, status) {
            (BatchOutcome::Summary { .. }, Some(id)) => {
                let _ = self.bot.delete_message(chat, id).await;
                self.send_html(chat, &reply).await;
            }
            (_, Some(id)) if reply.chars().count() <= MESSAGE_LIMIT => {
                if let Err(e) = self.bot.edit_message_text(chat, id, &reply).await {
                    tracing::warn!(chat_id = chat.0, error = %e, "failed to update status message");
                    self.send_html(chat, &reply).await;
                }
            }
            _ => self.send_html(chat, &reply).await,
        }

        tracing::info!(
            chat_id = key.chat.0,
            sender_id = key.sender.0,
            failed = outcome.failures().len(),
            "reply delivered"
        );
    }
}

impl<S: Summarizer + 'static> BatchHandler for TelegramReplier<S> {
    async fn handle(&self, batch: Batch) {
        self.deliver(batch).await;
    }
}

/// Telegram front end: routes text into the context history and documents
/// into the batch correlator.
pub struct TelegramBot<N, S> {
    bot: Bot,
    access: ChatAccess,
    history: Arc<RecentTextHistory>,
    status: Arc<StatusBoard>,
    correlator: BatchCorrelator<N, RecentTextHistory, TelegramReplier<S>>,
}

impl<N, S> TelegramBot<N, S>
where
    N: Normalize + 'static,
    S: Summarizer + 'static,
{
    /// # Errors
    ///
    /// Returns [`ChannelError::MissingToken`] for an empty token.
    pub fn new(
        token: &str,
        allowed_chats: &[i64],
        normalizer: N,
        summarizer: S,
        history: Arc<RecentTextHistory>,
        settings: CorrelatorSettings,
    ) -> Result<Self, ChannelError> {
        if token.trim().is_empty() {
            return Err(ChannelError::MissingToken);
        }
        let bot = Bot::new(token);
        let status = Arc::new(StatusBoard::default());
        let replier = Arc::new(TelegramReplier {
            bot: bot.clone(),
            processor: BatchProcessor::new(summarizer),
            status: Arc::clone(&status),
        });
        let correlator = BatchCorrelator::new(
            Arc::new(normalizer),
            Arc::clone(&history),
            replier,
            settings,
        );
        Ok(Self {
            bot,
            access: ChatAccess::new(allowed_chats.iter().copied()),
            history,
            status,
            correlator,
        })
    }

    /// Run the update dispatcher until Ctrl-C, then finalize open batches and
    /// wait up to `grace` for their replies.
    pub async fn run(self, grace: Duration) {
        let this = Arc::new(self);

        let history = Arc::clone(&this.history);
        let pruner = tokio::spawn(async move {
            let mut tick = tokio::time::interval(HISTORY_PRUNE_INTERVAL);
            loop {
                tick.tick().await;
                history.prune(Utc::now());
            }
        });

        let on_message = {
            let this = Arc::clone(&this);
            move |bot: Bot, msg: Message| {
                let this = Arc::clone(&this);
                async move {
                    this.on_message(&bot, &msg).await;
                    respond(())
                }
            }
        };
        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(on_message))
            .branch(
                Update::filter_my_chat_member().endpoint(|update: ChatMemberUpdated| async move {
                    tracing::info!(
                        chat_id = update.chat.id.0,
                        title = ?update.chat.title(),
                        old_status = ?update.old_chat_member.status(),
                        new_status = ?update.new_chat_member.status(),
                        "bot membership changed"
                    );
                    respond(())
                }),
            );

        tracing::info!("telegram dispatcher started");
        Dispatcher::builder(this.bot.clone(), handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        pruner.abort();
        this.drain(grace).await;
    }

    async fn drain(&self, grace: Duration) {
        self.correlator.flush_all();
        let deadline = tokio::time::Instant::now() + grace;
        while !self.correlator.is_idle() {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    open = self.correlator.open_keys(),
                    handling = self.correlator.handling(),
                    "shutdown grace period elapsed with batches pending"
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
        tracing::info!("all batches delivered");
    }

    async fn on_message(&self, bot: &Bot, msg: &Message) {
        let is_group = msg.chat.is_group() || msg.chat.is_supergroup();
        match self.access.decide(msg.chat.id.0, is_group) {
            Access::Allowed => {}
            Access::Denied { notify } => {
                tracing::warn!(chat_id = msg.chat.id.0, "message from chat outside allow-list");
                if notify {
                    if let Err(e) = bot.send_message(msg.chat.id, NOT_ALLOWED_TEXT).await {
                        tracing::warn!(chat_id = msg.chat.id.0, error = %e, "failed to send not-allowed notice");
                    }
                    if let Err(e) = bot.leave_chat(msg.chat.id).await {
                        tracing::warn!(chat_id = msg.chat.id.0, error = %e, "failed to leave chat");
                    }
                }
                return;
            }
        }

        if msg.from.as_ref().is_some_and(|u| u.is_bot) {
            return;
        }

        if let Some(text) = msg.text() {
            if let Some(cmd) = command(text) {
                self.on_command(bot, msg, cmd).await;
            } else if is_group {
                self.on_text(msg, text);
            }
            return;
        }

        if is_group && let Some(document) = msg.document() {
            self.on_document(bot, msg, document).await;
        }
    }

    async fn on_command(&self, bot: &Bot, msg: &Message, cmd: &str) {
        let reply = match cmd {
            "/start" => START_TEXT,
            "/help" => HELP_TEXT,
            _ => return,
        };
        if let Err(e) = bot.send_message(msg.chat.id, reply).await {
            tracing::warn!(chat_id = msg.chat.id.0, error = %e, "failed to answer command");
        }
    }

    fn on_text(&self, msg: &Message, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let key = self.key_for(msg);
        self.history.record(ContextMessage::new(key, text, msg.date));
        tracing::debug!(%key, chars = text.chars().count(), "text message recorded");
    }

    fn key_for(&self, msg: &Message) -> BatchKey {
        let sender = sender_or_chat(msg.from.as_ref().map(|u| u.id.0), msg.chat.id.0);
        BatchKey::new(msg.chat.id.0, sender)
    }

    async fn on_document(&self, bot: &Bot, msg: &Message, document: &teloxide::types::Document) {
        let filename = document
            .file_name
            .clone()
            .unwrap_or_else(|| "document.bin".to_owned());
        let mime = document.mime_type.as_ref().map(|m| m.essence_str().to_owned());
        let Some(kind) = DocumentKind::detect(&filename, mime.as_deref()) else {
            tracing::debug!(file = %filename, mime = ?mime, "unsupported upload ignored");
            return;
        };

        let key = self.key_for(msg);
        let grouped = msg.media_group_id().is_some();

        if !self.status.contains(key) {
            let text = if grouped {
                BATCH_RECEIVED_TEXT
            } else {
                SINGLE_RECEIVED_TEXT
            };
            match bot.send_message(msg.chat.id, text).await {
                Ok(sent) => self.status.insert(key, sent.id),
                Err(e) => tracing::warn!(%key, error = %e, "failed to post status message"),
            }
        }

        tracing::info!(%key, file = %filename, kind = kind.extension(), size = document.file.size, grouped, "document received");
        // Submit before downloading: the idle window runs from arrival, and a
        // failed download still reaches the batch as a failed document.
        let fetch = {
            let bot = bot.clone();
            let meta = document.file.clone();
            let filename = filename.clone();
            Box::pin(async move {
                match download(&bot, &meta).await {
                    Ok(bytes) => {
                        tracing::debug!(%key, file = %filename, bytes = bytes.len(), "document downloaded");
                        Ok(Document::new(filename, kind, bytes))
                    }
                    Err(e) => {
                        tracing::error!(%key, file = %filename, error = %e, "document download failed");
                        Err(ExtractError::Unavailable {
                            name: filename,
                            reason: e.to_string(),
                        })
                    }
                }
            })
        };
        self.correlator.submit(Submission {
            key,
            source: DocumentSource::Fetch { filename, fetch },
            unique_id: Some(document.file.unique_id.0.clone()),
            received_at: msg.date,
        });
        if !grouped {
            self.correlator.flush(key);
        }
    }
}

async fn download(bot: &Bot, meta: &FileMeta) -> Result<Vec<u8>, ChannelError> {
    let file = bot.get_file(meta.id.clone()).await?;
    let mut buf = Vec::new();
    bot.download_file(&file.path, &mut buf).await?;
    Ok(buf)
}
