use std::fmt::Write as _;

use tender_extract::{ExtractError, FailureKind};

use crate::assembler::{Assembled, assemble};
use crate::correlator::Batch;
use crate::summarizer::Summarizer;

const NOTHING_EXTRACTED_TEXT: &str = "Не удалось извлечь текст из файла. Для .doc нужен LibreOffice/antiword/catdoc, для .rar нужен unrar/7z/bsdtar/unar.";
const BATCH_NOTHING_EXTRACTED_TEXT: &str = "Не удалось извлечь текст из пакета документов.";
const DOWNLOAD_FAILED_TEXT: &str = "Не удалось скачать файл. Попробуйте отправить его ещё раз.";
const SUMMARY_FAILED_TEXT: &str = "Не удалось обработать файл. Проверьте формат документа и ключ API.";

/// A file that produced no text, ready for the user-facing report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDocument {
    pub name: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Short, user-facing reason without the file name.
#[must_use]
pub fn describe_failure(error: &ExtractError) -> String {
    match error {
        ExtractError::CorruptDocument { .. } => "файл повреждён или не является документом Word".into(),
        ExtractError::UnsupportedFormat { .. } => "формат не поддерживается или нет конвертера .doc".into(),
        ExtractError::EmptyDocument { .. } => "пустой текст".into(),
        ExtractError::NoToolAvailable { .. } => "не установлен распаковщик архивов".into(),
        ExtractError::CorruptArchive { .. } => "архив повреждён или защищён паролем".into(),
        ExtractError::EmptyArchive { .. } => "в архиве нет файлов .doc/.docx".into(),
        ExtractError::ToolTimeout { tool, after } => {
            format!("превышено время обработки ({tool}, {} с)", after.as_secs())
        }
        ExtractError::Unavailable { .. } => "не удалось скачать файл".into(),
        ExtractError::Io(e) => format!("ошибка ввода-вывода: {e}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Summary {
        text: String,
        failures: Vec<FailedDocument>,
    },
    /// Documents were received but none yielded text.
    NothingExtracted {
        documents: usize,
        failures: Vec<FailedDocument>,
    },
    SummaryFailed {
        error: String,
        failures: Vec<FailedDocument>,
    },
}

impl BatchOutcome {
    #[must_use]
    pub fn failures(&self) -> &[FailedDocument] {
        match self {
            Self::Summary { failures, .. }
            | Self::NothingExtracted { failures, .. }
            | Self::SummaryFailed { failures, .. } => failures,
        }
    }

    /// The message to send back to the chat.
    #[must_use]
    pub fn reply_text(&self) -> String {
        let mut out = match self {
            Self::Summary { text, .. } => text.clone(),
            Self::NothingExtracted { documents, .. } if *documents > 1 => {
                BATCH_NOTHING_EXTRACTED_TEXT.to_owned()
            }
            Self::NothingExtracted { failures, .. }
                if !failures.is_empty()
                    && failures.iter().all(|f| f.kind == FailureKind::Unavailable) =>
            {
                DOWNLOAD_FAILED_TEXT.to_owned()
            }
            Self::NothingExtracted { .. } => NOTHING_EXTRACTED_TEXT.to_owned(),
            Self::SummaryFailed { .. } => SUMMARY_FAILED_TEXT.to_owned(),
        };

        let failures = self.failures();
        if !failures.is_empty() {
            out.push_str("\n\nНе обработаны файлы:");
            for f in failures {
                let _ = write!(out, "\n- {}: {}", f.name, f.reason);
            }
        }
        out
    }
}

/// Assembles and summarizes finalized batches.
#[derive(Debug)]
pub struct BatchProcessor<S> {
    summarizer: S,
}

impl<S: Summarizer> BatchProcessor<S> {
    #[must_use]
    pub fn new(summarizer: S) -> Self {
        Self { summarizer }
    }

    #[must_use]
    pub fn summarizer(&self) -> &S {
        &self.summarizer
    }

    pub async fn process(&self, batch: &Batch) -> BatchOutcome {
        let failures: Vec<FailedDocument> = batch
            .failures()
            .into_iter()
            .map(|f| FailedDocument {
                name: f.name.to_owned(),
                kind: f.error.kind(),
                reason: describe_failure(f.error),
            })
            .collect();

        let documents = batch.documents.len();
        if documents > 0 && batch.texts().next().is_none() {
            tracing::warn!(key = %batch.key, documents, "no text extracted from batch");
            return BatchOutcome::NothingExtracted {
                documents,
                failures,
            };
        }

        let payload = match assemble(batch) {
            Assembled::Payload(payload) => payload,
            Assembled::Empty => {
                return BatchOutcome::NothingExtracted {
                    documents,
                    failures,
                };
            }
        };

        match self.summarizer.summarize(&payload).await {
            Ok(text) => {
                tracing::info!(
                    key = %batch.key,
                    documents = payload.document_count(),
                    failed = failures.len(),
                    chars = text.chars().count(),
                    "summary ready"
                );
                BatchOutcome::Summary { text, failures }
            }
            Err(e) => {
                tracing::error!(key = %batch.key, error = %e, "summarization failed");
                BatchOutcome::SummaryFailed {
                    error: e.to_string(),
                    failures,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use tender_extract::{ExtractedText, Normalized, SkippedDocument, TextBlock};
    use tender_llm::mock::MockProvider;

    use super::*;
    use crate::config::SummaryConfig;
    use crate::correlator::BatchDocument;
    use crate::history::{BatchKey, ContextMessage};
    use crate::summarizer::LlmSummarizer;

    fn ok(name: &str, body: &str) -> BatchDocument {
        BatchDocument {
            filename: name.to_owned(),
            result: Ok(Normalized::single(ExtractedText::new(
                name,
                vec![TextBlock::Paragraph(body.to_owned())],
            ))),
        }
    }

    fn err(name: &str, error: ExtractError) -> BatchDocument {
        BatchDocument {
            filename: name.to_owned(),
            result: Err(error),
        }
    }

    fn batch(documents: Vec<BatchDocument>, context: Option<&str>) -> Batch {
        let key = BatchKey::new(-1, 1);
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        Batch {
            key,
            documents,
            context: context.map(|c| ContextMessage::new(key, c, at)),
            opened_at: at,
            last_activity_at: at,
        }
    }

    fn processor(provider: MockProvider) -> BatchProcessor<LlmSummarizer<MockProvider>> {
        BatchProcessor::new(LlmSummarizer::new(provider, SummaryConfig::default()))
    }

    #[tokio::test]
    async fn partial_batch_reports_failures_after_summary() {
        let p = processor(MockProvider::with_responses(vec!["Кратко о закупке: ТКО".into()]));
        let outcome = p
            .process(&batch(
                vec![
                    ok("a.docx", "AAA"),
                    err(
                        "b.doc",
                        ExtractError::UnsupportedFormat {
                            name: "b.doc".into(),
                        },
                    ),
                ],
                None,
            ))
            .await;

        assert_eq!(
            outcome.reply_text(),
            "Файл: a.docx\n\nКратко о закупке: ТКО\n\n\
             Не обработаны файлы:\n- b.doc: формат не поддерживается или нет конвертера .doc"
        );
        assert_eq!(outcome.failures()[0].kind, FailureKind::UnsupportedFormat);
    }

    #[tokio::test]
    async fn lone_document_uses_its_filename() {
        let p = processor(MockProvider::default());
        let outcome = p.process(&batch(vec![ok("notice.docx", "text")], None)).await;
        assert_eq!(outcome.reply_text(), "Файл: notice.docx\n\nmock response");
    }

    #[tokio::test]
    async fn all_failed_is_nothing_extracted_even_with_context() {
        let provider = MockProvider::default();
        let p = processor(provider.clone());
        let outcome = p
            .process(&batch(
                vec![
                    err("a.docx", ExtractError::EmptyDocument { name: "a.docx".into() }),
                    err(
                        "b.rar",
                        ExtractError::ToolTimeout {
                            tool: "unrar".into(),
                            after: Duration::from_secs(120),
                        },
                    ),
                ],
                Some("https://zakupki.gov.ru/epz/order/1"),
            ))
            .await;

        assert!(matches!(outcome, BatchOutcome::NothingExtracted { documents: 2, .. }));
        assert!(provider.recorded_calls().is_empty());
        let reply = outcome.reply_text();
        assert!(reply.starts_with(BATCH_NOTHING_EXTRACTED_TEXT));
        assert!(reply.contains("- a.docx: пустой текст"));
        assert!(reply.contains("- b.rar: превышено время обработки (unrar, 120 с)"));
    }

    #[tokio::test]
    async fn single_failed_document_mentions_required_tools() {
        let p = processor(MockProvider::default());
        let outcome = p
            .process(&batch(
                vec![err(
                    "x.rar",
                    ExtractError::NoToolAvailable {
                        capability: "archive",
                    },
                )],
                None,
            ))
            .await;
        assert!(outcome.reply_text().starts_with(NOTHING_EXTRACTED_TEXT));
    }

    #[tokio::test]
    async fn failed_download_asks_to_resend() {
        let p = processor(MockProvider::default());
        let outcome = p
            .process(&batch(
                vec![err(
                    "tz.docx",
                    ExtractError::Unavailable {
                        name: "tz.docx".into(),
                        reason: "timeout".into(),
                    },
                )],
                None,
            ))
            .await;
        assert_eq!(
            outcome.reply_text(),
            format!("{DOWNLOAD_FAILED_TEXT}\n\nНе обработаны файлы:\n- tz.docx: не удалось скачать файл")
        );
    }

    #[tokio::test]
    async fn download_failure_in_batch_is_listed() {
        let p = processor(MockProvider::default());
        let outcome = p
            .process(&batch(
                vec![
                    ok("a.docx", "A"),
                    err(
                        "b.docx",
                        ExtractError::Unavailable {
                            name: "b.docx".into(),
                            reason: "timeout".into(),
                        },
                    ),
                ],
                None,
            ))
            .await;
        assert!(matches!(outcome, BatchOutcome::Summary { .. }));
        assert!(outcome.reply_text().ends_with("- b.docx: не удалось скачать файл"));
    }

    #[tokio::test]
    async fn skipped_archive_members_are_listed() {
        let members = Normalized {
            texts: vec![ExtractedText::new(
                "p.rar / 1.docx",
                vec![TextBlock::Paragraph("one".into())],
            )],
            skipped: vec![SkippedDocument {
                name: "p.rar / 2.docx".into(),
                error: ExtractError::CorruptDocument {
                    name: "p.rar / 2.docx".into(),
                    reason: "bad".into(),
                },
            }],
        };
        let doc = BatchDocument {
            filename: "p.rar".into(),
            result: Ok(members),
        };
        let p = processor(MockProvider::default());
        let outcome = p.process(&batch(vec![doc], None)).await;
        assert!(matches!(outcome, BatchOutcome::Summary { .. }));
        assert!(outcome.reply_text().ends_with(
            "Не обработаны файлы:\n- p.rar / 2.docx: файл повреждён или не является документом Word"
        ));
    }

    #[tokio::test]
    async fn provider_failure_is_summary_failed() {
        let p = processor(MockProvider::failing());
        let outcome = p.process(&batch(vec![ok("a.docx", "A")], None)).await;
        assert!(matches!(outcome, BatchOutcome::SummaryFailed { .. }));
        assert_eq!(outcome.reply_text(), SUMMARY_FAILED_TEXT);
    }

    #[tokio::test]
    async fn context_only_batch_is_summarized() {
        let p = processor(MockProvider::default());
        let outcome = p.process(&batch(vec![], Some("ссылка и цена"))).await;
        assert!(matches!(outcome, BatchOutcome::Summary { .. }));
    }
}
