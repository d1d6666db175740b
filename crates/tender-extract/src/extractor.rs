use crate::converter::ConverterChain;
use crate::docx::extract_docx;
use crate::error::ExtractError;
use crate::types::{DocumentKind, ExtractedText};

/// Single-document text extraction for `.doc` and `.docx`.
#[derive(Debug, Clone, Default)]
pub struct FormatExtractor {
    converters: ConverterChain,
}

impl FormatExtractor {
    #[must_use]
    pub fn new(converters: ConverterChain) -> Self {
        Self { converters }
    }

    #[must_use]
    pub fn converters(&self) -> &ConverterChain {
        &self.converters
    }

    /// # Errors
    ///
    /// `CorruptDocument`, `UnsupportedFormat`, `EmptyDocument` or `ToolTimeout`.
    /// Archives are rejected as `UnsupportedFormat`.
    pub async fn extract(
        &self,
        name: &str,
        kind: DocumentKind,
        bytes: Vec<u8>,
    ) -> Result<ExtractedText, ExtractError> {
        match kind {
            DocumentKind::Docx => {
                let owned = name.to_owned();
                tokio::task::spawn_blocking(move || extract_docx(&owned, &bytes))
                    .await
                    .map_err(|e| ExtractError::Io(std::io::Error::other(e)))?
            }
            DocumentKind::Doc => {
                let raw = self.converters.convert_to_text(name, &bytes).await?;
                let text = ExtractedText::from_plain_text(name, &raw);
                if text.is_empty() {
                    return Err(ExtractError::EmptyDocument {
                        name: name.to_owned(),
                    });
                }
                Ok(text)
            }
            DocumentKind::Rar => Err(ExtractError::UnsupportedFormat {
                name: name.to_owned(),
            }),
        }
    }
}
