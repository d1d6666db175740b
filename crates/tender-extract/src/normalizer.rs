use std::future::Future;

use crate::archive::ArchiveExpander;
use crate::error::ExtractError;
use crate::extractor::FormatExtractor;
use crate::types::{Document, DocumentKind, ExtractedText};

pub const DEFAULT_MAX_ARCHIVE_ENTRIES: usize = 30;

/// A document that contributed no text, with the reason.
#[derive(Debug)]
pub struct SkippedDocument {
    pub name: String,
    pub error: ExtractError,
}

/// Result of normalizing one received file.
///
/// A plain document yields one text. An archive yields one text per member
/// that extracted successfully; the others land in `skipped`.
#[derive(Debug, Default)]
pub struct Normalized {
    pub texts: Vec<ExtractedText>,
    pub skipped: Vec<SkippedDocument>,
}

impl Normalized {
    #[must_use]
    pub fn single(text: ExtractedText) -> Self {
        Self {
            texts: vec![text],
            skipped: Vec::new(),
        }
    }
}

/// Turns a received file into extracted text.
pub trait Normalize: Send + Sync {
    /// # Errors
    ///
    /// Whole-file failures only. Per-member archive failures are reported in
    /// [`Normalized::skipped`].
    fn normalize(
        &self,
        document: Document,
    ) -> impl Future<Output = Result<Normalized, ExtractError>> + Send;
}

/// Dispatches by [`DocumentKind`] to the format extractor or the archive
/// expander.
#[derive(Debug, Clone)]
pub struct DocumentNormalizer {
    extractor: FormatExtractor,
    archives: ArchiveExpander,
    max_archive_entries: usize,
}

impl DocumentNormalizer {
    #[must_use]
    pub fn new(extractor: FormatExtractor, archives: ArchiveExpander) -> Self {
        Self {
            extractor,
            archives,
            max_archive_entries: DEFAULT_MAX_ARCHIVE_ENTRIES,
        }
    }

    #[must_use]
    pub fn with_max_archive_entries(mut self, limit: usize) -> Self {
        self.max_archive_entries = limit;
        self
    }

    async fn normalize_archive(&self, archive: Document) -> Result<Normalized, ExtractError> {
        let members = self
            .archives
            .expand(&archive.filename, &archive.bytes, self.max_archive_entries)
            .await?;

        let mut out = Normalized::default();
        if members.is_empty() {
            tracing::warn!(file = %archive.filename, "archive contains no .doc/.docx files");
            out.skipped.push(SkippedDocument {
                error: ExtractError::EmptyArchive {
                    name: archive.filename.clone(),
                },
                name: archive.filename,
            });
            return Ok(out);
        }

        for member in members {
            match self
                .extractor
                .extract(&member.filename, member.kind, member.bytes)
                .await
            {
                Ok(text) => out.texts.push(text),
                Err(error) => {
                    tracing::warn!(file = %member.filename, kind = %error.kind(), %error, "archive member skipped");
                    out.skipped.push(SkippedDocument {
                        name: member.filename,
                        error,
                    });
                }
            }
        }

        tracing::debug!(
            file = %archive.filename,
            extracted = out.texts.len(),
            skipped = out.skipped.len(),
            "archive normalized"
        );
        Ok(out)
    }
}

impl Normalize for DocumentNormalizer {
    async fn normalize(&self, document: Document) -> Result<Normalized, ExtractError> {
        match document.kind {
            DocumentKind::Doc | DocumentKind::Docx => self
                .extractor
                .extract(&document.filename, document.kind, document.bytes)
                .await
                .map(Normalized::single),
            DocumentKind::Rar => self.normalize_archive(document).await,
        }
    }
}
