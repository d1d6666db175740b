//! Telegram transport for tenderbot.

pub mod error;
pub mod format;
pub mod telegram;

pub use error::ChannelError;
pub use telegram::{TelegramBot, TelegramReplier};
