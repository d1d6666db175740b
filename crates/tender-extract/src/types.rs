use std::path::Path;

/// Delimiter placed between non-empty table cells of one row.
pub const CELL_DELIMITER: &str = " | ";

const MIME_DOC: &str = "application/msword";
const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
const MIME_RAR: &[&str] = &["application/vnd.rar", "application/x-rar-compressed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Doc,
    Docx,
    Rar,
}

impl DocumentKind {
    /// Resolve the kind from the filename suffix, falling back to the MIME type
    /// only when the name has no extension at all.
    #[must_use]
    pub fn detect(filename: &str, mime: Option<&str>) -> Option<Self> {
        match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_extension(ext),
            None => mime.and_then(Self::from_mime),
        }
    }

    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "doc" => Some(Self::Doc),
            "docx" => Some(Self::Docx),
            "rar" => Some(Self::Rar),
            _ => None,
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.to_ascii_lowercase();
        if mime == MIME_DOC {
            Some(Self::Doc)
        } else if mime == MIME_DOCX {
            Some(Self::Docx)
        } else if MIME_RAR.contains(&mime.as_str()) {
            Some(Self::Rar)
        } else {
            None
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Doc => "doc",
            Self::Docx => "docx",
            Self::Rar => "rar",
        }
    }

    #[must_use]
    pub fn is_archive(self) -> bool {
        matches!(self, Self::Rar)
    }
}

/// A received file. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl Document {
    #[must_use]
    pub fn new(filename: impl Into<String>, kind: DocumentKind, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            kind,
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextBlock {
    Paragraph(String),
    /// One table row, cells already joined with [`CELL_DELIMITER`].
    TableRow(String),
}

impl TextBlock {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Paragraph(s) | Self::TableRow(s) => s,
        }
    }
}

/// Text blocks of one document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub source: String,
    pub blocks: Vec<TextBlock>,
}

impl ExtractedText {
    #[must_use]
    pub fn new(source: impl Into<String>, blocks: Vec<TextBlock>) -> Self {
        Self {
            source: source.into(),
            blocks,
        }
    }

    /// Build from converter output: one paragraph per non-blank line.
    #[must_use]
    pub fn from_plain_text(source: impl Into<String>, text: &str) -> Self {
        let blocks = text
            .lines()
            .map(clean_line)
            .filter(|l| !l.is_empty())
            .map(TextBlock::Paragraph)
            .collect();
        Self::new(source, blocks)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(block.as_str());
        }
        out
    }
}

/// Replace NBSP with a plain space and collapse whitespace runs.
pub(crate) fn clean_line(line: &str) -> String {
    line.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn join_cells<I, S>(cells: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cells: Vec<String> = cells
        .into_iter()
        .map(|c| clean_line(c.as_ref()))
        .filter(|c| !c.is_empty())
        .collect();
    if cells.is_empty() {
        None
    } else {
        Some(cells.join(CELL_DELIMITER))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn detect_prefers_extension() {
        assert_eq!(
            DocumentKind::detect("Тендер.DOCX", Some("application/msword")),
            Some(DocumentKind::Docx)
        );
        assert_eq!(DocumentKind::detect("a.rar", None), Some(DocumentKind::Rar));
        assert_eq!(DocumentKind::detect("a.pdf", Some(MIME_DOCX)), None);
    }

    #[test]
    fn detect_falls_back_to_mime() {
        assert_eq!(
            DocumentKind::detect("document", Some(MIME_DOCX)),
            Some(DocumentKind::Docx)
        );
        assert_eq!(
            DocumentKind::detect("document", Some("Application/MSWord")),
            Some(DocumentKind::Doc)
        );
        assert_eq!(
            DocumentKind::detect("bundle", Some("application/x-rar-compressed")),
            Some(DocumentKind::Rar)
        );
        assert_eq!(DocumentKind::detect("bundle", Some("image/png")), None);
        assert_eq!(DocumentKind::detect("bundle", None), None);
    }

    #[test]
    fn clean_line_collapses_nbsp_and_runs() {
        assert_eq!(clean_line("  a\u{a0}\u{a0}b \t c  "), "a b c");
        assert_eq!(clean_line("\u{a0} \t"), "");
    }

    #[test]
    fn join_cells_drops_empty() {
        assert_eq!(
            join_cells(["Цена", " ", "100\u{a0}000"]).as_deref(),
            Some("Цена | 100 000")
        );
        assert_eq!(join_cells(["", "  "]), None);
    }

    #[test]
    fn plain_text_skips_blank_lines() {
        let text = ExtractedText::from_plain_text("a.doc", "first\n\n   \n  second  line\r\n");
        assert_eq!(
            text.blocks,
            vec![
                TextBlock::Paragraph("first".into()),
                TextBlock::Paragraph("second line".into())
            ]
        );
        assert_eq!(text.text(), "first\nsecond line");
    }

    #[test]
    fn empty_text_is_empty_sequence() {
        let text = ExtractedText::from_plain_text("a.doc", "");
        assert!(text.is_empty());
        assert_eq!(text.text(), "");
    }

    proptest! {
        #[test]
        fn clean_line_is_idempotent_and_trimmed(line in "[a-zа-я \u{a0}\t]{0,60}") {
            let cleaned = clean_line(&line);
            prop_assert_eq!(clean_line(&cleaned), cleaned.clone());
            prop_assert!(!cleaned.starts_with(' ') && !cleaned.ends_with(' '));
            prop_assert!(!cleaned.contains("  "));
            prop_assert!(!cleaned.contains('\u{a0}'), "cleaned line still contains a non-breaking space");
        }

        #[test]
        fn join_cells_keeps_every_non_blank_cell(
            cells in proptest::collection::vec("[a-z ]{0,10}", 0..8),
        ) {
            let kept = cells.iter().filter(|c| !c.trim().is_empty()).count();
            match join_cells(&cells) {
                None => prop_assert_eq!(kept, 0),
                Some(row) => prop_assert_eq!(row.split(CELL_DELIMITER).count(), kept),
            }
        }
    }
}
