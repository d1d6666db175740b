//! Builds the single summarization payload for a finalized batch.

use std::fmt::Write as _;

use crate::correlator::Batch;

const CONTEXT_HEADING: &str = "### Контекст из сообщения перед пакетом";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    Context,
    /// `index` is 1-based.
    Document { index: usize, source: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSection {
    pub kind: SectionKind,
    pub body: String,
}

/// Summarization input: an optional context section followed by one
/// section per extracted document in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub title: String,
    pub sections: Vec<PayloadSection>,
}

impl Payload {
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| matches!(s.kind, SectionKind::Document { .. }))
            .count()
    }

    #[must_use]
    pub fn has_context(&self) -> bool {
        self.sections.iter().any(|s| s.kind == SectionKind::Context)
    }

    /// A lone document without context is sent as-is; anything else gets
    /// labelled sections.
    #[must_use]
    pub fn render(&self) -> String {
        if let [only] = self.sections.as_slice()
            && matches!(only.kind, SectionKind::Document { .. })
        {
            return only.body.clone();
        }

        let mut out = String::new();
        for section in &self.sections {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            match &section.kind {
                SectionKind::Context => {
                    let _ = write!(out, "{CONTEXT_HEADING}\n{}", section.body);
                }
                SectionKind::Document { index, source } => {
                    let _ = write!(out, "### Документ {index}: {source}\n{}", section.body);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    Payload(Payload),
    /// No document text and no context: nothing worth summarizing.
    Empty,
}

/// Title used for anything other than a lone document.
#[must_use]
pub fn batch_title(documents: usize) -> String {
    format!("Пакет документов ({documents} файла)")
}

#[must_use]
pub fn assemble(batch: &Batch) -> Assembled {
    let mut sections = Vec::new();

    if let Some(context) = &batch.context {
        let text = context.text.trim();
        if !text.is_empty() {
            sections.push(PayloadSection {
                kind: SectionKind::Context,
                body: text.to_owned(),
            });
        }
    }

    let mut index = 0;
    let mut lone_source = None;
    for text in batch.texts() {
        index += 1;
        lone_source = Some(text.source.clone());
        sections.push(PayloadSection {
            kind: SectionKind::Document {
                index,
                source: text.source.clone(),
            },
            body: text.text(),
        });
    }

    if sections.is_empty() {
        return Assembled::Empty;
    }

    let title = match lone_source {
        Some(source) if index == 1 && sections.len() == 1 => source,
        _ => batch_title(index),
    };

    tracing::debug!(key = %batch.key, documents = index, %title, "payload assembled");
    Assembled::Payload(Payload { title, sections })
}
