use crate::error::ExtractError;
use crate::formats::file_stem;
use crate::hasher::hash_file;
use crate::models::{
    FileType, IndexEntry, IndexOptions, LibraryCatalog, Metadata, SidecarSummary, SkippedFile,
    TocEntry,
};
use crate::render::{json_artifact_name, metadata_artifact_name, text_artifact_name};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const INDEX_FILE_NAME: &str = "library_index.json";

/// Supported source documents under `folder`, recursively, sorted.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() && FileType::is_supported(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn default_index_path(library_root: &Path) -> PathBuf {
    library_root.join(INDEX_FILE_NAME)
}

pub fn load_catalog(index_path: &Path) -> Result<LibraryCatalog, ExtractError> {
    let raw = fs::read_to_string(index_path).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => ExtractError::NotFound(index_path.to_path_buf()),
        _ => ExtractError::Io(error),
    })?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn save_catalog(catalog: &LibraryCatalog, index_path: &Path) -> Result<(), ExtractError> {
    if let Some(parent) = index_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(index_path, serde_json::to_string_pretty(catalog)?)?;
    Ok(())
}

/// Relative key with `/` separators regardless of platform.
pub(crate) fn relative_key(library_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(library_root).unwrap_or(path);
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Where an entry's metadata comes from, in lookup order.
#[derive(Debug, Clone, PartialEq)]
pub enum EntrySource {
    /// The prior entry's hash matches; it is kept as-is.
    Cached(IndexEntry),
    /// A previous extraction left a metadata or full JSON artifact.
    Sidecar {
        path: PathBuf,
        metadata: Metadata,
        toc: Vec<TocEntry>,
    },
    /// Nothing to reuse; the document is listed as not extracted.
    Placeholder,
}

/// Hash-match cache first, sidecar artifact second, placeholder last.
pub fn lookup_entry(
    prior: Option<&IndexEntry>,
    current_hash: &str,
    source_path: &Path,
    force_reindex: bool,
) -> EntrySource {
    if let Some(prior) = prior.filter(|entry| !force_reindex && entry.content_hash == current_hash) {
        return EntrySource::Cached(prior.clone());
    }

    match find_sidecar(source_path) {
        Some((path, summary)) => EntrySource::Sidecar {
            path,
            metadata: summary.metadata.unwrap_or_default(),
            toc: summary.toc,
        },
        None => EntrySource::Placeholder,
    }
}

/// `<stem>_metadata.json`, then `<stem>.json`, next to the source file.
pub fn find_sidecar(source_path: &Path) -> Option<(PathBuf, SidecarSummary)> {
    let stem = source_path.file_stem()?.to_str()?;
    let dir = source_path.parent().unwrap_or_else(|| Path::new(""));

    [metadata_artifact_name(stem), json_artifact_name(stem)]
        .into_iter()
        .map(|name| dir.join(name))
        .filter(|candidate| candidate.is_file())
        .find_map(|candidate| {
            let parsed = fs::read_to_string(&candidate)
                .map_err(ExtractError::from)
                .and_then(|raw| Ok(serde_json::from_str::<SidecarSummary>(&raw)?));
            match parsed {
                Ok(summary) => Some((candidate, summary)),
                Err(error) => {
                    warn!(path = %candidate.display(), %error, "ignoring unreadable sidecar");
                    None
                }
            }
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub unchanged: usize,
    pub from_sidecar: usize,
    pub placeholders: usize,
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub catalog: LibraryCatalog,
    pub index_path: PathBuf,
    pub stats: IndexStats,
    pub skipped_files: Vec<SkippedFile>,
}

#[derive(Debug, Clone)]
pub struct CatalogBuild {
    pub catalog: LibraryCatalog,
    pub stats: IndexStats,
    pub skipped_files: Vec<SkippedFile>,
}

/// Builds the catalog for `library_root` without touching the index file.
///
/// A file that cannot be read or hashed is logged and skipped; its prior
/// entry, if any, is carried over. Entries for files that no longer exist are
/// dropped.
pub fn build_catalog(
    library_root: &Path,
    existing: Option<&LibraryCatalog>,
    force_reindex: bool,
) -> Result<CatalogBuild, ExtractError> {
    if !library_root.is_dir() {
        return Err(ExtractError::NotFound(library_root.to_path_buf()));
    }

    let now = Utc::now();
    let mut documents = BTreeMap::new();
    let mut stats = IndexStats::default();
    let mut skipped_files = Vec::new();

    for path in discover_documents(library_root) {
        let key = relative_key(library_root, &path);
        let prior = existing.and_then(|catalog| catalog.documents.get(&key));

        let current_hash = match hash_file(&path) {
            Ok(hash) => hash,
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipping unreadable document");
                skipped_files.push(SkippedFile {
                    path: path.clone(),
                    reason: error.to_string(),
                });
                if let Some(prior) = prior {
                    documents.insert(key, prior.clone());
                }
                continue;
            }
        };

        let entry = match lookup_entry(prior, &current_hash, &path, force_reindex) {
            EntrySource::Cached(entry) => {
                stats.unchanged += 1;
                entry
            }
            EntrySource::Sidecar { path: sidecar, metadata, toc } => {
                debug!(source = %path.display(), sidecar = %sidecar.display(), "reusing sidecar");
                stats.from_sidecar += 1;
                new_entry(library_root, &path, key.clone(), current_hash, metadata, toc, true, now)
            }
            EntrySource::Placeholder => {
                stats.placeholders += 1;
                new_entry(library_root, &path, key.clone(), current_hash, Metadata::default(), Vec::new(), false, now)
            }
        };
        documents.insert(key, entry);
    }

    if let Some(existing) = existing {
        for stale in existing.documents.keys().filter(|key| !documents.contains_key(*key)) {
            debug!(document = %stale, "dropping entry for missing document");
        }
    }

    let extracted_count = documents.values().filter(|entry| entry.extracted).count();
    let catalog = LibraryCatalog {
        library_root: absolute(library_root).display().to_string(),
        created_at: existing.map_or(now, |catalog| catalog.created_at),
        updated_at: now,
        total_documents: documents.len(),
        extracted_count,
        documents,
    };

    Ok(CatalogBuild {
        catalog,
        stats,
        skipped_files,
    })
}

#[allow(clippy::too_many_arguments)]
fn new_entry(
    library_root: &Path,
    path: &Path,
    key: String,
    content_hash: String,
    mut metadata: Metadata,
    toc: Vec<TocEntry>,
    extracted: bool,
    indexed_at: DateTime<Utc>,
) -> IndexEntry {
    let stem = file_stem(&key);
    if metadata.title.trim().is_empty() {
        metadata.title = stem.clone();
    }

    let text_artifact_path = extracted
        .then(|| path.with_file_name(text_artifact_name(&stem)))
        .filter(|text_path| text_path.is_file())
        .map(|text_path| relative_key(library_root, &text_path));

    IndexEntry {
        relative_path: key,
        file_path: absolute(path).display().to_string(),
        content_hash,
        metadata,
        toc,
        extracted,
        text_artifact_path,
        indexed_at,
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Loads the prior catalog (if any), rebuilds it and persists the result.
/// The index file is written once, after every document was visited.
pub fn build_index(library_root: &Path, options: &IndexOptions) -> Result<IndexReport, ExtractError> {
    if !library_root.is_dir() {
        return Err(ExtractError::NotFound(library_root.to_path_buf()));
    }

    let index_path = options
        .index_path
        .clone()
        .unwrap_or_else(|| default_index_path(library_root));
    let existing = if index_path.is_file() {
        Some(load_catalog(&index_path)?)
    } else {
        None
    };

    let build = build_catalog(library_root, existing.as_ref(), options.force_reindex)?;
    save_catalog(&build.catalog, &index_path)?;

    info!(
        library = %library_root.display(),
        total = build.catalog.total_documents,
        extracted = build.catalog.extracted_count,
        unchanged = build.stats.unchanged,
        skipped = build.skipped_files.len(),
        "library index updated"
    );

    Ok(IndexReport {
        catalog: build.catalog,
        index_path,
        stats: build.stats,
        skipped_files: build.skipped_files,
    })
}

/// Human-readable listing of a catalog.
pub fn render_catalog(catalog: &LibraryCatalog) -> String {
    let rule = "=".repeat(70);
    let mut lines = vec![
        rule.clone(),
        "LIBRARY CATALOG".to_string(),
        rule.clone(),
        format!("Library: {}", catalog.library_root),
        format!("Total Documents: {}", catalog.total_documents),
        format!("Extracted: {}", catalog.extracted_count),
        format!("Last Updated: {}", catalog.updated_at.to_rfc3339()),
        rule,
        String::new(),
    ];

    for (position, (key, entry)) in catalog.documents.iter().enumerate() {
        let status = if entry.extracted { "✓" } else { "○" };
        let author = entry
            .metadata
            .author
            .as_ref()
            .map_or_else(|| "Unknown".to_string(), ToString::to_string);
        let pages = entry
            .metadata
            .page_count
            .map_or_else(|| "?".to_string(), |count| count.to_string());

        lines.push(format!("{:3}. [{status}] {}", position + 1, entry.metadata.title));
        lines.push(format!("      Author: {author} | Pages: {pages}"));
        lines.push(format!("      File: {key}"));
        lines.push(String::new());
    }

    lines.join("\n")
}
