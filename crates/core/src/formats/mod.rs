//! Format adapters: every supported document kind is normalised into one
//! [`ExtractionRecord`].
//!
//! Dispatch is a plain match on [`FileType`]; the set of formats is closed.

pub mod docx;
pub mod markdown;
pub mod pdf;

use crate::error::ExtractError;
use crate::hasher::hash_bytes;
use crate::models::{Body, ExtractOptions, ExtractionRecord, FileType, Metadata, TocEntry};
use crate::render::render_text;
use chrono::Utc;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Characters per estimated page for formats without real pagination.
pub const CHARS_PER_PAGE: usize = 3000;

/// What an adapter recovers from a document, before provenance is attached.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub metadata: Metadata,
    pub frontmatter: Option<serde_json::Value>,
    pub toc: Vec<TocEntry>,
    pub body: Body,
}

/// `max(1, chars / 3000 + 1)` with integer division.
pub fn estimate_pages(total_chars: usize) -> u32 {
    (total_chars / CHARS_PER_PAGE + 1).max(1) as u32
}

pub(crate) fn file_stem(source_name: &str) -> String {
    Path::new(source_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_name.to_string())
}

/// Extracts a document on disk. Fails fast: a missing file, an unsupported
/// extension or an unreadable document is returned to the caller.
pub fn extract_path(path: &Path, options: &ExtractOptions) -> Result<ExtractionRecord, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::NotFound(path.to_path_buf()));
    }
    let file_type = FileType::from_path(path)?;
    let source_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ExtractError::MissingFileName(path.display().to_string()))?;

    let bytes = fs::read(path)?;
    extract_bytes(file_type, &bytes, source_name, options)
}

/// Extracts an in-memory document, choosing the adapter from the extension
/// of `source_name`.
pub fn extract_named(
    bytes: &[u8],
    source_name: &str,
    options: &ExtractOptions,
) -> Result<ExtractionRecord, ExtractError> {
    let file_type = FileType::from_path(Path::new(source_name))?;
    extract_bytes(file_type, bytes, source_name, options)
}

pub fn extract_bytes(
    file_type: FileType,
    bytes: &[u8],
    source_name: &str,
    options: &ExtractOptions,
) -> Result<ExtractionRecord, ExtractError> {
    let parsed = match file_type {
        FileType::Pdf => pdf::parse(bytes, source_name)?,
        FileType::Markdown => markdown::parse(bytes, source_name)?,
        FileType::Docx => docx::parse(bytes, source_name)?,
    };

    let mut record = ExtractionRecord {
        source_name: source_name.to_string(),
        file_type,
        content_hash: hash_bytes(bytes),
        extracted_at: Utc::now(),
        metadata: parsed.metadata,
        frontmatter: parsed.frontmatter,
        toc_locator: file_type.locator_unit(),
        toc: parsed.toc,
        body: parsed.body,
        rendered_text: None,
    };

    if !options.include_toc {
        record.toc.clear();
    }
    if !options.include_metadata {
        record.metadata = record.metadata.without_descriptive_fields();
        record.frontmatter = None;
    }
    record.rendered_text = Some(render_text(&record));

    debug!(
        source = source_name,
        file_type = %file_type,
        toc_entries = record.toc.len(),
        units = record.body.len(),
        "extracted document"
    );
    Ok(record)
}
