use std::time::Duration;

/// Classified extraction failure.
///
/// Every path through the extractor, archive expander and normalizer ends in
/// either text or one of these variants.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("{name}: corrupt document: {reason}")]
    CorruptDocument { name: String, reason: String },

    #[error("{name}: unsupported format")]
    UnsupportedFormat { name: String },

    #[error("{name}: no extractable text")]
    EmptyDocument { name: String },

    #[error("no {capability} tool available on PATH")]
    NoToolAvailable { capability: &'static str },

    #[error("{name}: corrupt archive: {reason}")]
    CorruptArchive { name: String, reason: String },

    #[error("{name}: archive contains no .doc/.docx files")]
    EmptyArchive { name: String },

    #[error("{tool} timed out after {}s", after.as_secs())]
    ToolTimeout { tool: String, after: Duration },

    /// The bytes never arrived, e.g. a failed download.
    #[error("{name}: unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse failure classes for logging and user-facing reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    CorruptDocument,
    UnsupportedFormat,
    EmptyDocument,
    NoToolAvailable,
    CorruptArchive,
    EmptyArchive,
    ToolTimeout,
    Unavailable,
    Io,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CorruptDocument => "corrupt_document",
            Self::UnsupportedFormat => "unsupported_format",
            Self::EmptyDocument => "empty_document",
            Self::NoToolAvailable => "no_tool_available",
            Self::CorruptArchive => "corrupt_archive",
            Self::EmptyArchive => "empty_archive",
            Self::ToolTimeout => "tool_timeout",
            Self::Unavailable => "unavailable",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ExtractError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CorruptDocument { .. } => FailureKind::CorruptDocument,
            Self::UnsupportedFormat { .. } => FailureKind::UnsupportedFormat,
            Self::EmptyDocument { .. } => FailureKind::EmptyDocument,
            Self::NoToolAvailable { .. } => FailureKind::NoToolAvailable,
            Self::CorruptArchive { .. } => FailureKind::CorruptArchive,
            Self::EmptyArchive { .. } => FailureKind::EmptyArchive,
            Self::ToolTimeout { .. } => FailureKind::ToolTimeout,
            Self::Unavailable { .. } => FailureKind::Unavailable,
            Self::Io(_) => FailureKind::Io,
        }
    }

    /// Environment problems that retrying another document cannot fix.
    #[must_use]
    pub fn is_environmental(&self) -> bool {
        matches!(self, Self::NoToolAvailable { .. })
    }
}
