//! Full-text search over rendered text artifacts.
//!
//! Page and section identity comes only from the marker lines written by
//! [`crate::render::render_text`]; see [`crate::markers`].

use crate::batch::ERROR_LOG_FILE_NAME;
use crate::error::ExtractError;
use crate::indexer::{default_index_path, load_catalog, relative_key};
use crate::markers::{Location, MarkerKind, MarkerMap};
use crate::models::{
    FileSearchResult, LibraryCatalog, SearchMatch, SearchOptions, SearchReport, SkippedFile,
    SUPPORTED_EXTENSIONS,
};
use crate::render::TOC_ARTIFACT_SUFFIX;
use regex::{Regex, RegexBuilder};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const ELLIPSIS: &str = "...";

/// Literal patterns are escaped; both kinds are case-insensitive unless
/// `case_sensitive` is set.
pub fn compile_pattern(pattern: &str, is_regex: bool, case_sensitive: bool) -> Result<Regex, ExtractError> {
    let source = if is_regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };

    Ok(RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()?)
}

/// Snippet around one match. Offsets count chars of `text`, ellipses included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    pub text: String,
    pub match_start: usize,
    pub match_end: usize,
}

fn step_back(text: &str, position: usize, chars: usize) -> usize {
    text[..position]
        .char_indices()
        .rev()
        .take(chars)
        .last()
        .map_or(position, |(offset, _)| offset)
}

fn step_forward(text: &str, position: usize, chars: usize) -> usize {
    text[position..]
        .char_indices()
        .nth(chars)
        .map_or(text.len(), |(offset, _)| position + offset)
}

/// Collapses whitespace runs to one space (trimming both ends) and maps the
/// byte span of the match to char offsets in the collapsed string.
fn collapse_whitespace(window: &str, span: Range<usize>) -> (String, usize, usize) {
    let mut out = String::with_capacity(window.len());
    let mut emitted = 0;
    let mut pending_space = false;
    let mut match_start = None;
    let mut match_end = None;

    for (offset, ch) in window.char_indices() {
        if offset == span.start {
            match_start = Some(emitted + usize::from(pending_space && !ch.is_whitespace()));
        }
        if offset == span.end {
            match_end = Some(emitted);
        }
        if ch.is_whitespace() {
            pending_space = emitted > 0;
            continue;
        }
        if pending_space {
            out.push(' ');
            emitted += 1;
            pending_space = false;
        }
        out.push(ch);
        emitted += 1;
    }

    let start = match_start.unwrap_or(emitted);
    let end = match_end.unwrap_or(emitted).max(start);
    (out, start, end)
}

/// Widens `span` by `context_chars` on each side, then outward to the
/// nearest whitespace so no word is cut.
pub fn context_window(text: &str, span: Range<usize>, context_chars: usize) -> ContextWindow {
    let start = step_back(text, span.start, context_chars);
    let end = step_forward(text, span.end, context_chars);

    let start = text[..start]
        .char_indices()
        .rev()
        .find(|(_, ch)| ch.is_whitespace())
        .map_or(0, |(offset, ch)| offset + ch.len_utf8());
    let end = text[end..]
        .find(char::is_whitespace)
        .map_or(text.len(), |offset| end + offset);

    let (collapsed, match_start, match_end) =
        collapse_whitespace(&text[start..end], span.start - start..span.end - start);

    let leading = start > 0;
    let trailing = end < text.len();
    let shift = if leading { ELLIPSIS.len() } else { 0 };

    ContextWindow {
        text: format!(
            "{}{collapsed}{}",
            if leading { ELLIPSIS } else { "" },
            if trailing { ELLIPSIS } else { "" }
        ),
        match_start: match_start + shift,
        match_end: match_end + shift,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub location: Location,
    pub context: ContextWindow,
}

/// Every non-empty match in document order. Matches touching a marker line
/// are structural and are not reported.
pub fn search_text(text: &str, regex: &Regex, context_chars: usize) -> Vec<TextMatch> {
    let markers = MarkerMap::parse(text);
    let marker_lines: Vec<Range<usize>> = markers
        .markers()
        .iter()
        .map(|marker| {
            let end = text[marker.offset..]
                .find('\n')
                .map_or(text.len(), |offset| marker.offset + offset);
            marker.offset..end
        })
        .collect();

    regex
        .find_iter(text)
        .filter(|found| !found.as_str().is_empty())
        .filter(|found| {
            !marker_lines
                .iter()
                .any(|line| line.start < found.end() && found.start() < line.end)
        })
        .map(|found| TextMatch {
            location: markers.locate(found.start()),
            context: context_window(text, found.range(), context_chars),
        })
        .collect()
}

/// `# Title` on the first line, otherwise the file stem.
pub fn artifact_title(text: &str, path: &Path) -> String {
    text.lines()
        .next()
        .and_then(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

/// Text artifacts under `library_root`, sorted, without TOC sidecars or the
/// batch error log.
pub fn discover_text_artifacts(library_root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(library_root)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            let is_txt = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));
            let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
            is_txt && !name.ends_with(TOC_ARTIFACT_SUFFIX) && name != ERROR_LOG_FILE_NAME
        })
        .collect();

    files.sort_unstable();
    files
}

/// The source document an artifact was rendered from, if it sits next to it.
fn sibling_source(text_path: &Path) -> Option<PathBuf> {
    SUPPORTED_EXTENSIONS
        .iter()
        .map(|extension| text_path.with_extension(extension))
        .find(|candidate| candidate.is_file())
}

fn read_catalog(library_root: &Path, index_path: Option<&Path>) -> Option<LibraryCatalog> {
    let path = index_path.map_or_else(|| default_index_path(library_root), Path::to_path_buf);
    if !path.is_file() {
        return None;
    }

    match load_catalog(&path) {
        Ok(catalog) => Some(catalog),
        Err(error) => {
            warn!(path = %path.display(), %error, "ignoring unreadable library index");
            None
        }
    }
}

/// Searches one artifact on disk.
pub fn search_file(
    path: &Path,
    regex: &Regex,
    context_chars: usize,
    title: Option<&str>,
) -> Result<Vec<SearchMatch>, ExtractError> {
    let bytes = fs::read(path).map_err(|error| match error.kind() {
        std::io::ErrorKind::NotFound => ExtractError::NotFound(path.to_path_buf()),
        _ => ExtractError::Io(error),
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let title = title.map_or_else(|| artifact_title(&text, path), str::to_string);
    let file_path = path.display().to_string();

    Ok(search_text(&text, regex, context_chars)
        .into_iter()
        .map(|found| SearchMatch {
            file_path: file_path.clone(),
            title: title.clone(),
            page: found.location.locator,
            marker: found.location.kind,
            section_title: found.location.title,
            context: found.context.text,
            match_start_in_context: found.context.match_start,
            match_end_in_context: found.context.match_end,
        })
        .collect())
}

/// Searches every text artifact in a library.
///
/// The pattern is compiled before the library is touched, so an invalid
/// regex fails the call without reading any file.
pub fn search_library(library_root: &Path, options: &SearchOptions) -> Result<SearchReport, ExtractError> {
    let regex = compile_pattern(&options.pattern, options.is_regex, options.case_sensitive)?;

    if !library_root.is_dir() {
        return Err(ExtractError::NotFound(library_root.to_path_buf()));
    }

    let text_files = discover_text_artifacts(library_root);
    Ok(search_artifacts(library_root, &text_files, &regex, options))
}

/// Searches the given artifacts of a library. An artifact that cannot be
/// read is reported in `skipped_files` and contributes no matches.
pub fn search_artifacts(
    library_root: &Path,
    text_files: &[PathBuf],
    regex: &Regex,
    options: &SearchOptions,
) -> SearchReport {
    let catalog = read_catalog(library_root, options.index_path.as_deref());
    let mut results = Vec::new();
    let mut skipped_files = Vec::new();

    for path in text_files {
        let source = sibling_source(path);
        let file_key = match &source {
            Some(source) => relative_key(library_root, source),
            None => relative_key(library_root, &path.with_extension("")),
        };
        let catalog_title = catalog
            .as_ref()
            .and_then(|catalog| catalog.documents.get(&file_key))
            .map(|entry| entry.metadata.title.as_str())
            .filter(|title| !title.is_empty());

        let mut matches = match search_file(path, regex, options.context_chars, catalog_title) {
            Ok(matches) => matches,
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipping unreadable artifact");
                skipped_files.push(SkippedFile {
                    path: path.clone(),
                    reason: error.to_string(),
                });
                continue;
            }
        };

        if matches.is_empty() {
            continue;
        }
        if let Some(limit) = options.max_results_per_file.filter(|limit| *limit > 0) {
            matches.truncate(limit);
        }

        results.push(FileSearchResult {
            file_key,
            title: matches[0].title.clone(),
            file_path: path.display().to_string(),
            source_path: source.map(|source| source.display().to_string()),
            match_count: matches.len(),
            matches,
        });
    }

    let total_matches = results.iter().map(|result| result.match_count).sum();
    debug!(
        pattern = %options.pattern,
        files = text_files.len(),
        total_matches,
        "search finished"
    );

    SearchReport {
        pattern: options.pattern.clone(),
        is_regex: options.is_regex,
        case_sensitive: options.case_sensitive,
        files_searched: text_files.len(),
        files_with_matches: results.len(),
        total_matches,
        results,
        skipped_files,
    }
}

pub fn format_report(report: &SearchReport) -> String {
    if report.total_matches == 0 {
        return format!("No matches found for \"{}\"", report.pattern);
    }

    let mut lines = vec![
        format!(
            "Found \"{}\" in {} documents:",
            report.pattern, report.files_with_matches
        ),
        String::new(),
    ];

    for (position, result) in report.results.iter().enumerate() {
        let name = result
            .source_path
            .as_deref()
            .and_then(|source| Path::new(source).file_name())
            .map_or_else(|| result.file_key.clone(), |name| name.to_string_lossy().into_owned());
        lines.push(format!("{}. {} ({name})", position + 1, result.title));

        for found in &result.matches {
            let label = match (found.marker, &found.section_title) {
                (MarkerKind::Section, Some(title)) => format!("Section {} ({title})", found.page),
                (kind, _) => format!("{} {}", kind.label(), found.page),
            };
            lines.push(format!("   - {label}: \"{}\"", found.context));
        }
        lines.push(String::new());
    }

    lines.join("\n")
}
