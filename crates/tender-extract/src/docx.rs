//! Native `.docx` reader: paragraphs and table rows from `word/document.xml`.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::ExtractError;
use crate::types::{ExtractedText, TextBlock, clean_line, join_cells};

const DOCUMENT_PART: &str = "word/document.xml";
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract paragraphs and table rows in body order.
///
/// Top-level paragraphs become [`TextBlock::Paragraph`]; each row of a
/// top-level table becomes one [`TextBlock::TableRow`]. Nested tables are
/// flattened into the enclosing cell.
///
/// # Errors
///
/// `CorruptDocument` if the container or XML cannot be read,
/// `EmptyDocument` if no non-blank block is found.
pub fn extract_docx(name: &str, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let corrupt = |reason: String| ExtractError::CorruptDocument {
        name: name.to_owned(),
        reason,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| corrupt(e.to_string()))?;
    let entry = archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| corrupt(format!("{DOCUMENT_PART}: {e}")))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| corrupt(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(corrupt(format!("{DOCUMENT_PART} exceeds size limit")));
    }

    let blocks = walk_body(&xml).map_err(corrupt)?;
    if blocks.is_empty() {
        return Err(ExtractError::EmptyDocument {
            name: name.to_owned(),
        });
    }
    Ok(ExtractedText::new(name, blocks))
}

#[derive(Default)]
struct BodyWalker {
    blocks: Vec<TextBlock>,
    table_depth: usize,
    in_text: bool,
    paragraph: String,
    cell: String,
    row: Vec<String>,
}

impl BodyWalker {
    fn buffer(&mut self) -> &mut String {
        if self.table_depth == 0 {
            &mut self.paragraph
        } else {
            &mut self.cell
        }
    }

    fn open(&mut self, tag: &[u8]) {
        match tag {
            b"tbl" => self.table_depth += 1,
            b"tr" if self.table_depth == 1 => self.row.clear(),
            b"tc" if self.table_depth == 1 => self.cell.clear(),
            b"p" if self.table_depth == 0 => self.paragraph.clear(),
            b"p" => {
                if !self.cell.is_empty() {
                    self.cell.push(' ');
                }
            }
            b"t" => self.in_text = true,
            _ => {}
        }
    }

    fn close(&mut self, tag: &[u8]) {
        match tag {
            b"t" => self.in_text = false,
            b"p" if self.table_depth == 0 => {
                let line = clean_line(&self.paragraph);
                if !line.is_empty() {
                    self.blocks.push(TextBlock::Paragraph(line));
                }
                self.paragraph.clear();
            }
            b"tc" if self.table_depth == 1 => {
                let cell = std::mem::take(&mut self.cell);
                self.row.push(cell);
            }
            b"tr" if self.table_depth == 1 => {
                if let Some(row) = join_cells(self.row.drain(..)) {
                    self.blocks.push(TextBlock::TableRow(row));
                }
            }
            b"tbl" => self.table_depth = self.table_depth.saturating_sub(1),
            _ => {}
        }
    }

    fn empty(&mut self, tag: &[u8]) {
        if matches!(tag, b"tab" | b"br" | b"cr") {
            self.buffer().push(' ');
        }
    }
}

fn walk_body(xml: &[u8]) -> Result<Vec<TextBlock>, String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut walker = BodyWalker::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => walker.open(e.local_name().as_ref()),
            Ok(Event::End(e)) => walker.close(e.local_name().as_ref()),
            Ok(Event::Empty(e)) => walker.empty(e.local_name().as_ref()),
            Ok(Event::Text(t)) if walker.in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                walker.buffer().push_str(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {e}",
                    reader.buffer_position()
                ));
            }
        }
        buf.clear();
    }

    Ok(walker.blocks)
}
