use crate::error::ExtractError;
use crate::formats::{estimate_pages, file_stem, ParsedDocument};
use crate::models::{Author, Body, Metadata, TocEntry};
use crate::segmenter::{segment_units, Boundary};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::debug;

const FRONTMATTER_DELIMITER: &str = "---";

fn heading_regex() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("heading pattern is valid"))
}

fn closing_hashes_regex() -> &'static Regex {
    static CLOSING: OnceLock<Regex> = OnceLock::new();
    CLOSING.get_or_init(|| Regex::new(r"\s*#+\s*$").expect("closing hash pattern is valid"))
}

pub fn parse(bytes: &[u8], source_name: &str) -> Result<ParsedDocument, ExtractError> {
    let content = std::str::from_utf8(bytes)
        .map_err(|error| ExtractError::corrupt("markdown", error))?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let (frontmatter, body) = split_frontmatter(content);
    let mut metadata = metadata_from_frontmatter(&frontmatter, source_name);

    let toc = extract_headings(&body);
    let lines: Vec<&str> = body.split('\n').collect();
    let boundaries: Vec<Boundary> = toc
        .iter()
        .map(|entry| Boundary {
            start: entry.locator.saturating_sub(1) as usize,
            title: entry.title.clone(),
            level: entry.level,
        })
        .collect();
    let sections = segment_units(&lines, &boundaries, |slice| slice.join("\n").trim().to_string());

    let char_count = body.chars().count();
    metadata.page_count = Some(estimate_pages(char_count));
    metadata.word_count = Some(body.split_whitespace().count() as u64);
    metadata.char_count = Some(char_count as u64);

    Ok(ParsedDocument {
        metadata,
        frontmatter: Some(Value::Object(frontmatter)),
        toc,
        body: Body::Sections(sections),
    })
}

/// Splits a leading `---` YAML block from the body.
///
/// A block that fails to parse, or parses to anything but a mapping (a
/// thematic break followed by prose), is treated as absent: the frontmatter
/// is empty and the body is the whole original content, delimiters included.
/// An empty block is empty frontmatter.
pub fn split_frontmatter(content: &str) -> (Map<String, Value>, String) {
    if !content.starts_with(FRONTMATTER_DELIMITER) {
        return (Map::new(), content.to_string());
    }

    let parts: Vec<&str> = content.splitn(3, FRONTMATTER_DELIMITER).collect();
    let [_, yaml, rest] = parts.as_slice() else {
        return (Map::new(), content.to_string());
    };

    match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
        Ok(serde_yaml::Value::Mapping(mapping)) => {
            (yaml_mapping_to_json(mapping), rest.trim().to_string())
        }
        Ok(serde_yaml::Value::Null) => (Map::new(), rest.trim().to_string()),
        Ok(_) => {
            debug!("leading `---` block is not a mapping; keeping it as body");
            (Map::new(), content.to_string())
        }
        Err(error) => {
            debug!(%error, "ignoring unparsable frontmatter");
            (Map::new(), content.to_string())
        }
    }
}

fn yaml_mapping_to_json(mapping: serde_yaml::Mapping) -> Map<String, Value> {
    mapping
        .into_iter()
        .filter_map(|(key, value)| {
            let key = match key {
                serde_yaml::Value::String(key) => key,
                serde_yaml::Value::Number(number) => number.to_string(),
                serde_yaml::Value::Bool(flag) => flag.to_string(),
                _ => return None,
            };
            let value = serde_json::to_value(value).ok()?;
            Some((key, value))
        })
        .collect()
}

/// ATX headings (`#` to `######` after trimming the line), with a closing
/// run of `#` removed from the title. Locators are 1-based body lines.
pub fn extract_headings(body: &str) -> Vec<TocEntry> {
    body.split('\n')
        .enumerate()
        .filter_map(|(index, line)| {
            let capture = heading_regex().captures(line.trim())?;
            let level = capture.get(1)?.as_str().len() as u32;
            let title = capture.get(2)?.as_str().trim();
            let title = closing_hashes_regex().replace(title, "").into_owned();

            Some(TocEntry {
                level,
                title,
                locator: index as u32 + 1,
            })
        })
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// First alias with a non-empty value.
fn first_present<'a>(frontmatter: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| frontmatter.get(*key))
        .find(|value| match value {
            Value::Null => false,
            Value::String(text) => !text.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(fields) => !fields.is_empty(),
            Value::Bool(flag) => *flag,
            Value::Number(_) => true,
        })
}

fn metadata_from_frontmatter(frontmatter: &Map<String, Value>, source_name: &str) -> Metadata {
    let title = first_present(frontmatter, &["title"])
        .and_then(scalar_text)
        .unwrap_or_else(|| file_stem(source_name));

    let author = first_present(frontmatter, &["author", "authors"]).and_then(|value| match value {
        Value::Array(items) => Some(Author::Many(items.iter().filter_map(scalar_text).collect())),
        other => scalar_text(other).map(Author::Single),
    });

    let subject = first_present(frontmatter, &["subject", "description"]).and_then(scalar_text);

    let keywords = match first_present(frontmatter, &["keywords", "tags"]) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut metadata = Metadata {
        title,
        author,
        subject,
        keywords,
        ..Metadata::default()
    };
    for key in ["date", "category"] {
        let value = frontmatter.get(key).cloned().unwrap_or(Value::Null);
        metadata.extra.insert(key.to_string(), value);
    }
    metadata
}
