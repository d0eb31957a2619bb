use crate::error::ExtractError;
use crate::markers::{page_marker, section_marker};
use crate::models::{
    Body, ExtractOptions, ExtractionRecord, FileType, LocatorUnit, Metadata, OutputOptions,
    TocEntry,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const RULE_WIDTH: usize = 60;
const TOC_WIDTH: usize = 60;
const MIN_LEADER_DOTS: usize = 3;

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// The flattened text rendition: a header block followed by one marker line
/// per page or section. Search reads the markers back.
pub fn render_text(record: &ExtractionRecord) -> String {
    let metadata = &record.metadata;
    let mut out = format!("# {}\n", metadata.title);

    if let Some(author) = &metadata.author {
        out.push_str(&format!("# Author: {author}\n"));
    }
    out.push_str(&format!("# Source: {}\n", record.source_name));

    match &record.body {
        Body::Pages(pages) => {
            let count = metadata.page_count.unwrap_or(pages.len() as u32);
            out.push_str(&format!("# Pages: {count}\n"));
        }
        Body::Sections(_) => {
            out.push_str(&format!("# Words: {}\n", metadata.word_count.unwrap_or(0)));
        }
    }
    out.push_str(&rule());
    out.push_str("\n\n");

    match &record.body {
        Body::Pages(pages) => {
            for page in pages {
                out.push_str(&format!("\n{}\n\n{}\n", page_marker(page.page), page.text));
            }
        }
        Body::Sections(sections) => {
            for section in sections {
                out.push_str(&format!(
                    "\n{}\n\n{}\n",
                    section_marker(section.index, &section.title),
                    section.text
                ));
            }
        }
    }

    out
}

/// One line per entry: indented by level, dot leader, `Page N`.
pub fn format_toc(toc: &[TocEntry]) -> String {
    if toc.is_empty() {
        return "No table of contents found in document.\n".to_string();
    }

    toc.iter()
        .map(|entry| {
            let indent = "  ".repeat(entry.level.saturating_sub(1) as usize);
            let prefix = format!("{indent}{}", entry.title);
            let suffix = format!("Page {}", entry.locator);
            let used = prefix.chars().count() + suffix.chars().count();
            let dots = ".".repeat(TOC_WIDTH.saturating_sub(used).max(MIN_LEADER_DOTS));
            format!("{prefix}{dots}{suffix}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_toc_file(record: &ExtractionRecord) -> String {
    format!(
        "Table of Contents: {}\n{}\n\n{}",
        record.metadata.title,
        rule(),
        format_toc(&record.toc)
    )
}

/// Shape of `<stem>_metadata.json`; the indexer reads `metadata` and `toc`.
#[derive(Debug, Serialize)]
struct MetadataSidecar<'a> {
    source_name: &'a str,
    extracted_at: DateTime<Utc>,
    content_hash: &'a str,
    metadata: &'a Metadata,
    toc_locator: LocatorUnit,
    toc: &'a [TocEntry],
}

pub fn text_artifact_name(stem: &str) -> String {
    format!("{stem}.txt")
}

pub fn json_artifact_name(stem: &str) -> String {
    format!("{stem}.json")
}

pub fn toc_artifact_name(stem: &str) -> String {
    format!("{stem}_toc.txt")
}

pub fn metadata_artifact_name(stem: &str) -> String {
    format!("{stem}_metadata.json")
}

pub const TOC_ARTIFACT_SUFFIX: &str = "_toc.txt";

/// Writes the persisted artifacts for one extraction and returns their paths.
///
/// Markdown and DOCX get a single text and/or JSON file; PDF additionally
/// gets the TOC and metadata sidecars. Existing files are overwritten.
pub fn write_artifacts(
    record: &ExtractionRecord,
    source_path: &Path,
    output: &OutputOptions,
    extract: &ExtractOptions,
) -> Result<Vec<PathBuf>, ExtractError> {
    let output_dir = match &output.output_dir {
        Some(dir) => dir.clone(),
        None => source_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    };
    fs::create_dir_all(&output_dir)?;

    let stem = source_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| ExtractError::MissingFileName(source_path.display().to_string()))?;

    let mut written = Vec::new();

    if output.format.writes_text() {
        let path = output_dir.join(text_artifact_name(stem));
        let text = match &record.rendered_text {
            Some(text) => text.clone(),
            None => render_text(record),
        };
        fs::write(&path, text)?;
        written.push(path);
    }

    if output.format.writes_json() {
        let path = output_dir.join(json_artifact_name(stem));
        fs::write(&path, serde_json::to_string_pretty(record)?)?;
        written.push(path);
    }

    if record.file_type == FileType::Pdf {
        if extract.include_toc && !record.toc.is_empty() {
            let path = output_dir.join(toc_artifact_name(stem));
            fs::write(&path, render_toc_file(record))?;
            written.push(path);
        }

        if extract.include_metadata {
            let path = output_dir.join(metadata_artifact_name(stem));
            let sidecar = MetadataSidecar {
                source_name: &record.source_name,
                extracted_at: record.extracted_at,
                content_hash: &record.content_hash,
                metadata: &record.metadata,
                toc_locator: record.toc_locator,
                toc: &record.toc,
            };
            fs::write(&path, serde_json::to_string_pretty(&sidecar)?)?;
            written.push(path);
        }
    }

    info!(source = %source_path.display(), files = written.len(), "wrote artifacts");
    Ok(written)
}
