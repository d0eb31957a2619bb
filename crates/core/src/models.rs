use crate::error::ExtractError;
use crate::markers::MarkerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Extensions (lowercase, without the dot) recognised as source documents.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "md", "markdown", "docx"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Markdown,
    Docx,
}

impl FileType {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "md" | "markdown" => Some(Self::Markdown),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    /// File type is decided by extension alone, never by sniffing content.
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        Self::from_extension(extension).ok_or_else(|| {
            ExtractError::UnsupportedFormat(if extension.is_empty() {
                format!("{} has no extension", path.display())
            } else {
                format!(".{}", extension.to_ascii_lowercase())
            })
        })
    }

    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Markdown => "markdown",
            Self::Docx => "docx",
        }
    }

    pub fn locator_unit(self) -> LocatorUnit {
        match self {
            Self::Pdf => LocatorUnit::Page,
            Self::Markdown => LocatorUnit::Line,
            Self::Docx => LocatorUnit::Paragraph,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of [`TocEntry::locator`]; persisted next to the TOC so readers know
/// whether a locator counts pages, body lines or paragraphs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LocatorUnit {
    Page,
    Line,
    Paragraph,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Author {
    Single(String),
    Many(Vec<String>),
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(name) => f.write_str(name),
            Self::Many(names) => f.write_str(&names.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_count: Option<u64>,
    /// Format-specific fields (creator, category, created, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub(crate) fn set_extra(&mut self, key: &str, value: Option<String>) {
        let value = value.map_or(serde_json::Value::Null, serde_json::Value::String);
        self.extra.insert(key.to_string(), value);
    }

    /// Keeps the title and the computed statistics, dropping descriptive fields.
    pub fn without_descriptive_fields(&self) -> Self {
        Self {
            title: self.title.clone(),
            page_count: self.page_count,
            word_count: self.word_count,
            char_count: self.char_count,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TocEntry {
    pub level: u32,
    pub title: String,
    #[serde(alias = "page", alias = "line", alias = "paragraph")]
    pub locator: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    #[serde(alias = "section")]
    pub index: u32,
    pub title: String,
    #[serde(default = "default_level")]
    pub level: u32,
    pub text: String,
}

fn default_level() -> u32 {
    1
}

/// PDF records carry pages; Markdown and DOCX records carry sections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    Pages(Vec<Page>),
    Sections(Vec<Section>),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Self::Pages(pages) => pages.len(),
            Self::Sections(sections) => sections.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionRecord {
    pub source_name: String,
    pub file_type: FileType,
    pub content_hash: String,
    pub extracted_at: DateTime<Utc>,
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontmatter: Option<serde_json::Value>,
    pub toc_locator: LocatorUnit,
    pub toc: Vec<TocEntry>,
    #[serde(flatten)]
    pub body: Body,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_text: Option<String>,
}

impl ExtractionRecord {
    pub fn pages(&self) -> Option<&[Page]> {
        match &self.body {
            Body::Pages(pages) => Some(pages),
            Body::Sections(_) => None,
        }
    }

    pub fn sections(&self) -> Option<&[Section]> {
        match &self.body {
            Body::Sections(sections) => Some(sections),
            Body::Pages(_) => None,
        }
    }
}

/// What a sidecar artifact (`<stem>_metadata.json` or `<stem>.json`) is
/// required to contain for the indexer to reuse it.
#[derive(Debug, Clone, Deserialize)]
pub struct SidecarSummary {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub toc: Vec<TocEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub relative_path: String,
    pub file_path: String,
    pub content_hash: String,
    pub metadata: Metadata,
    pub toc: Vec<TocEntry>,
    pub extracted: bool,
    pub text_artifact_path: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryCatalog {
    pub library_root: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_documents: usize,
    pub extracted_count: usize,
    pub documents: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchMatch {
    pub file_path: String,
    pub title: String,
    pub page: u32,
    pub marker: MarkerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    pub context: String,
    pub match_start_in_context: usize,
    pub match_end_in_context: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSearchResult {
    pub file_key: String,
    pub title: String,
    pub file_path: String,
    pub source_path: Option<String>,
    pub match_count: usize,
    pub matches: Vec<SearchMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchReport {
    pub pattern: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    pub files_searched: usize,
    pub files_with_matches: usize,
    pub total_matches: usize,
    pub results: Vec<FileSearchResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<SkippedFile>,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub include_metadata: bool,
    pub include_toc: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            include_toc: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
    Both,
}

impl OutputFormat {
    pub fn writes_text(self) -> bool {
        matches!(self, Self::Txt | Self::Both)
    }

    pub fn writes_json(self) -> bool {
        matches!(self, Self::Json | Self::Both)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub format: OutputFormat,
    /// Defaults to the directory of the source document.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Defaults to `<library>/library_index.json`.
    pub index_path: Option<PathBuf>,
    pub force_reindex: bool,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub pattern: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    pub context_chars: usize,
    pub max_results_per_file: Option<usize>,
    pub index_path: Option<PathBuf>,
}

pub const DEFAULT_CONTEXT_CHARS: usize = 80;

impl SearchOptions {
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            is_regex: false,
            case_sensitive: false,
            context_chars: DEFAULT_CONTEXT_CHARS,
            max_results_per_file: None,
            index_path: None,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            is_regex: true,
            ..Self::literal(pattern)
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub continue_on_error: bool,
    pub output: OutputOptions,
    pub extract: ExtractOptions,
    pub jobs: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            output: OutputOptions::default(),
            extract: ExtractOptions::default(),
            jobs: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_is_chosen_by_extension_case_insensitively() {
        assert_eq!(FileType::from_path(Path::new("a/B.PDF")).ok(), Some(FileType::Pdf));
        assert_eq!(
            FileType::from_path(Path::new("notes.Markdown")).ok(),
            Some(FileType::Markdown)
        );
        assert_eq!(FileType::from_path(Path::new("r.docx")).ok(), Some(FileType::Docx));
        assert!(matches!(
            FileType::from_path(Path::new("sheet.xlsx")),
            Err(ExtractError::UnsupportedFormat(_))
        ));
        assert!(!FileType::is_supported(Path::new("README")));
    }

    #[test]
    fn toc_entries_accept_legacy_locator_names() -> Result<(), Box<dyn std::error::Error>> {
        let entry: TocEntry = serde_json::from_str(r#"{"level":2,"title":"Intro","page":7}"#)?;
        assert_eq!(entry.locator, 7);

        let entry: TocEntry = serde_json::from_str(r#"{"level":1,"title":"A","paragraph":3}"#)?;
        assert_eq!(entry.locator, 3);
        Ok(())
    }

    #[test]
    fn metadata_keeps_unknown_fields_as_extras() -> Result<(), Box<dyn std::error::Error>> {
        let raw = r#"{"title":"T","author":["a","b"],"keywords":[],"creator":"Writer"}"#;
        let metadata: Metadata = serde_json::from_str(raw)?;

        assert_eq!(metadata.author, Some(Author::Many(vec!["a".into(), "b".into()])));
        assert_eq!(
            metadata.extra.get("creator"),
            Some(&serde_json::Value::String("Writer".into()))
        );
        assert_eq!(metadata.author.map(|a| a.to_string()), Some("a, b".to_string()));
        Ok(())
    }
}
