//! Batch correlation, payload assembly and summarization for tender
//! documents, plus the bot configuration.

pub mod assembler;
pub mod config;
pub mod correlator;
pub mod history;
pub mod processor;
pub mod summarizer;

pub use assembler::{Assembled, Payload, PayloadSection, SectionKind, assemble};
pub use config::{Config, ConfigError};
pub use correlator::{
    Batch, BatchCorrelator, BatchDocument, BatchHandler, CorrelatorSettings, DocumentSource,
    Submission,
};
pub use history::{BatchKey, ChatId, ContextMessage, ContextSource, RecentTextHistory, SenderId};
pub use processor::{BatchOutcome, BatchProcessor, FailedDocument};
pub use summarizer::{LlmSummarizer, SummarizeError, Summarizer};
