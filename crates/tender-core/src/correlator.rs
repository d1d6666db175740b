//! Per-(chat, sender) batching of incoming documents.
//!
//! Each key with an open batch owns a task and a mailbox. The task waits for
//! either the next event or the batch deadline, whichever comes first, then
//! finalizes the batch exactly once and hands it to a [`BatchHandler`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tender_extract::{Document, ExtractError, ExtractedText, Normalize, Normalized};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::BatchConfig;
use crate::history::{BatchKey, ContextMessage, ContextSource, select_context};

/// Where the bytes of a submitted document come from.
pub enum DocumentSource {
    Ready(Document),
    /// Fetched inside the batch, so a slow download does not delay the
    /// next submission for the same key.
    Fetch {
        filename: String,
        fetch: BoxFuture<'static, Result<Document, ExtractError>>,
    },
}

impl DocumentSource {
    #[must_use]
    pub fn filename(&self) -> &str {
        match self {
            Self::Ready(document) => &document.filename,
            Self::Fetch { filename, .. } => filename,
        }
    }

    async fn resolve(self) -> Result<Document, ExtractError> {
        match self {
            Self::Ready(document) => Ok(document),
            Self::Fetch { fetch, .. } => fetch.await,
        }
    }
}

impl From<Document> for DocumentSource {
    fn from(document: Document) -> Self {
        Self::Ready(document)
    }
}

impl std::fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(document) => f.debug_tuple("Ready").field(document).finish(),
            Self::Fetch { filename, .. } => f
                .debug_struct("Fetch")
                .field("filename", filename)
                .finish_non_exhaustive(),
        }
    }
}

/// One file received from the transport.
#[derive(Debug)]
pub struct Submission {
    pub key: BatchKey,
    pub source: DocumentSource,
    /// Transport-level identity of the file, used to drop re-deliveries.
    pub unique_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A batch member together with its extraction outcome.
#[derive(Debug)]
pub struct BatchDocument {
    pub filename: String,
    pub result: Result<Normalized, ExtractError>,
}

/// A finalized batch. Immutable once handed to the [`BatchHandler`].
#[derive(Debug)]
pub struct Batch {
    pub key: BatchKey,
    pub documents: Vec<BatchDocument>,
    pub context: Option<ContextMessage>,
    pub opened_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// A document or archive member that produced no text.
#[derive(Debug, Clone, Copy)]
pub struct Failure<'a> {
    pub name: &'a str,
    pub error: &'a ExtractError,
}

impl Batch {
    /// Successfully extracted texts in arrival order, archive members in
    /// archive order.
    pub fn texts(&self) -> impl Iterator<Item = &ExtractedText> {
        self.documents
            .iter()
            .filter_map(|d| d.result.as_ref().ok())
            .flat_map(|n| n.texts.iter())
            .filter(|t| !t.is_empty())
    }

    /// Every whole-document failure and skipped archive member.
    #[must_use]
    pub fn failures(&self) -> Vec<Failure<'_>> {
        let mut out = Vec::new();
        for doc in &self.documents {
            match &doc.result {
                Err(error) => out.push(Failure {
                    name: &doc.filename,
                    error,
                }),
                Ok(normalized) => out.extend(normalized.skipped.iter().map(|s| Failure {
                    name: &s.name,
                    error: &s.error,
                })),
            }
        }
        out
    }
}

/// Receives finalized batches.
pub trait BatchHandler: Send + Sync + 'static {
    fn handle(&self, batch: Batch) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct CorrelatorSettings {
    /// Finalize after this long without a new document.
    pub idle_window: Duration,
    /// Finalize at the latest this long after the first document.
    pub max_span: Duration,
    /// Context messages older than this relative to `opened_at` are ignored.
    pub context_max_age: Duration,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self::from(&BatchConfig::default())
    }
}

impl From<&BatchConfig> for CorrelatorSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            idle_window: config.idle_window(),
            max_span: config.max_span().max(config.idle_window()),
            context_max_age: config.context_max_age(),
        }
    }
}

enum KeyEvent {
    Document(Submission),
    Flush,
}

struct Inner<N, C, H> {
    normalizer: Arc<N>,
    context: Arc<C>,
    handler: Arc<H>,
    settings: CorrelatorSettings,
    mailboxes: Mutex<HashMap<BatchKey, mpsc::UnboundedSender<KeyEvent>>>,
    /// Finalized batches whose handler has not returned yet.
    handling: AtomicUsize,
}

/// Decrements the handler count when a handler task ends, even on panic.
struct HandlingGuard<N, C, H>(Arc<Inner<N, C, H>>);

impl<N, C, H> Drop for HandlingGuard<N, C, H> {
    fn drop(&mut self) {
        self.0.handling.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Groups documents into batches per [`BatchKey`].
///
/// Keys are independent: each one is served by its own task, so a slow
/// extraction or finalize on one key never delays another.
pub struct BatchCorrelator<N, C, H> {
    inner: Arc<Inner<N, C, H>>,
}

impl<N, C, H> Clone for BatchCorrelator<N, C, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N, C, H> BatchCorrelator<N, C, H>
where
    N: Normalize + 'static,
    C: ContextSource + 'static,
    H: BatchHandler,
{
    #[must_use]
    pub fn new(
        normalizer: Arc<N>,
        context: Arc<C>,
        handler: Arc<H>,
        settings: CorrelatorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                normalizer,
                context,
                handler,
                settings,
                mailboxes: Mutex::new(HashMap::new()),
                handling: AtomicUsize::new(0),
            }),
        }
    }

    /// Add a document to the open batch for its key, opening one if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, submission: Submission) {
        let key = submission.key;
        let Ok(mut mailboxes) = self.inner.mailboxes.lock() else {
            tracing::error!(%key, "correlator lock poisoned, document dropped");
            return;
        };

        let mut event = KeyEvent::Document(submission);
        if let Some(tx) = mailboxes.get(&key) {
            match tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => event = returned,
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive: it is moved into the task below.
        let _ = tx.send(event);
        mailboxes.insert(key, tx);
        drop(mailboxes);

        tracing::debug!(%key, "batch opened");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_key(inner, key, rx));
    }

    /// Finalize the open batch for `key` now. No-op when nothing is open.
    pub fn flush(&self, key: BatchKey) {
        if let Ok(mailboxes) = self.inner.mailboxes.lock()
            && let Some(tx) = mailboxes.get(&key)
        {
            let _ = tx.send(KeyEvent::Flush);
        }
    }

    /// Finalize every open batch, e.g. on shutdown.
    pub fn flush_all(&self) {
        if let Ok(mailboxes) = self.inner.mailboxes.lock() {
            for tx in mailboxes.values() {
                let _ = tx.send(KeyEvent::Flush);
            }
        }
    }

    /// Whether `key` has an open batch or a finalize in progress.
    #[must_use]
    pub fn is_open(&self, key: BatchKey) -> bool {
        self.inner
            .mailboxes
            .lock()
            .is_ok_and(|m| m.contains_key(&key))
    }

    /// Number of keys with an open batch or a finalize in progress.
    #[must_use]
    pub fn open_keys(&self) -> usize {
        self.inner.mailboxes.lock().map_or(0, |m| m.len())
    }

    /// Number of finalized batches whose handler is still running.
    #[must_use]
    pub fn handling(&self) -> usize {
        self.inner.handling.load(Ordering::SeqCst)
    }

    /// No batch is open, finalizing or being handled.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        // The handler count is raised before a key leaves the map, so reading
        // both under the lock cannot miss a batch in between.
        self.inner
            .mailboxes
            .lock()
            .is_ok_and(|m| m.is_empty() && self.inner.handling.load(Ordering::SeqCst) == 0)
    }
}

struct OpenBatch {
    opened_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    opened: Instant,
    last_activity: Instant,
    seen: HashSet<String>,
    pending: Vec<(String, JoinHandle<Result<Normalized, ExtractError>>)>,
}

impl OpenBatch {
    fn new(first: &Submission) -> Self {
        let now = Instant::now();
        Self {
            opened_at: first.received_at,
            last_activity_at: first.received_at,
            opened: now,
            last_activity: now,
            seen: HashSet::new(),
            pending: Vec::new(),
        }
    }

    fn deadline(&self, settings: &CorrelatorSettings) -> Instant {
        (self.last_activity + settings.idle_window).min(self.opened + settings.max_span)
    }

    fn add<N: Normalize + 'static>(&mut self, submission: Submission, normalizer: &Arc<N>) {
        let key = submission.key;
        let filename = submission.source.filename().to_owned();
        if let Some(id) = &submission.unique_id
            && !self.seen.insert(id.clone())
        {
            tracing::debug!(%key, file = %filename, "duplicate document ignored");
            return;
        }

        self.last_activity = Instant::now();
        self.last_activity_at = self.last_activity_at.max(submission.received_at);

        let normalizer = Arc::clone(normalizer);
        let source = submission.source;
        let handle = tokio::spawn(async move {
            let document = source.resolve().await?;
            normalizer.normalize(document).await
        });
        tracing::debug!(%key, file = %filename, "document added to batch");
        self.pending.push((filename, handle));
    }
}

async fn run_key<N, C, H>(
    inner: Arc<Inner<N, C, H>>,
    key: BatchKey,
    mut rx: mpsc::UnboundedReceiver<KeyEvent>,
) where
    N: Normalize + 'static,
    C: ContextSource + 'static,
    H: BatchHandler,
{
    let mut next = rx.recv().await;

    loop {
        if let Some(KeyEvent::Document(first)) = next.take() {
            let mut batch = OpenBatch::new(&first);
            batch.add(first, &inner.normalizer);

            loop {
                let deadline = batch.deadline(&inner.settings);
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(KeyEvent::Document(submission)) => batch.add(submission, &inner.normalizer),
                        Some(KeyEvent::Flush) | None => break,
                    },
                    () = tokio::time::sleep_until(deadline) => break,
                }
            }

            finalize(&inner, key, batch).await;
        }

        // Retire under the mailbox lock so no submission can slip in between
        // the emptiness check and the removal.
        let Ok(mut mailboxes) = inner.mailboxes.lock() else {
            return;
        };
        match rx.try_recv() {
            Ok(event) => {
                drop(mailboxes);
                next = Some(event);
            }
            Err(_) => {
                mailboxes.remove(&key);
                return;
            }
        }
    }
}

async fn finalize<N, C, H>(inner: &Arc<Inner<N, C, H>>, key: BatchKey, batch: OpenBatch)
where
    N: Normalize + 'static,
    C: ContextSource + 'static,
    H: BatchHandler,
{
    let mut documents = Vec::with_capacity(batch.pending.len());
    for (filename, handle) in batch.pending {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ExtractError::Io(std::io::Error::other(e))),
        };
        if let Err(e) = &result {
            tracing::warn!(%key, file = %filename, kind = %e.kind(), error = %e, "document skipped");
        }
        documents.push(BatchDocument { filename, result });
    }

    let max_age = inner.settings.context_max_age;
    let since = batch.opened_at
        - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
    let candidates = inner.context.recent_text_messages(key, since);
    let context = select_context(&candidates, key, batch.opened_at, max_age);

    let finalized = Batch {
        key,
        documents,
        context,
        opened_at: batch.opened_at,
        last_activity_at: batch.last_activity_at,
    };

    tracing::info!(
        chat_id = key.chat.0,
        sender_id = key.sender.0,
        documents = finalized.documents.len(),
        has_context = finalized.context.is_some(),
        "batch finalized"
    );

    inner.handling.fetch_add(1, Ordering::SeqCst);
    let guard = HandlingGuard(Arc::clone(inner));
    tokio::spawn(async move {
        guard.0.handler.handle(finalized).await;
        drop(guard);
    });
}
