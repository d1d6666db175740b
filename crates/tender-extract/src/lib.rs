//! Text extraction for tender documents: native `.docx` reading, external
//! `.doc` converters and `.rar` archivers.

pub mod archive;
pub mod converter;
pub mod docx;
pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod tool;
pub mod types;

pub use archive::{ArchiveExpander, Archiver};
pub use converter::{ConverterChain, DocConverter};
pub use error::{ExtractError, FailureKind};
pub use extractor::FormatExtractor;
pub use normalizer::{DocumentNormalizer, Normalize, Normalized, SkippedDocument};
pub use types::{Document, DocumentKind, ExtractedText, TextBlock};
