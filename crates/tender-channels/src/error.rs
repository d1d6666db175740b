//! Error types for tender-channels.

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Telegram API error.
    #[error("Telegram API error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Downloading an attached file failed.
    #[error("file download failed: {0}")]
    Download(#[from] teloxide::DownloadError),

    /// The bot token is missing or empty.
    #[error("telegram bot token is not configured")]
    MissingToken,
}
