//! Page and section marker lines embedded in rendered text.
//!
//! The renderer writes them and the search engine parses them back to
//! recover page/section identity, so both sides go through this module.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Page,
    Section,
}

impl MarkerKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Page => "Page",
            Self::Section => "Section",
        }
    }
}

pub fn page_marker(page: u32) -> String {
    format!("--- Page {page} ---")
}

/// Whitespace runs in `title` (line breaks included) become single spaces;
/// a marker must stay on one line to be parsed back.
pub fn section_marker(index: u32, title: &str) -> String {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("--- Section {index}: {title} ---")
}

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?m)^--- (?:Page (\d+)|Section (\d+): (.*)) ---\r?$")
            .expect("marker pattern is a valid regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Byte offset of the start of the marker line.
    pub offset: usize,
    pub kind: MarkerKind,
    pub locator: u32,
    pub title: Option<String>,
}

/// Where a byte position falls in rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub kind: MarkerKind,
    pub locator: u32,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MarkerMap {
    markers: Vec<Marker>,
}

impl MarkerMap {
    pub fn parse(text: &str) -> Self {
        let markers = marker_regex()
            .captures_iter(text)
            .filter_map(|capture| {
                let offset = capture.get(0)?.start();
                if let Some(page) = capture.get(1) {
                    return Some(Marker {
                        offset,
                        kind: MarkerKind::Page,
                        locator: page.as_str().parse().ok()?,
                        title: None,
                    });
                }

                Some(Marker {
                    offset,
                    kind: MarkerKind::Section,
                    locator: capture.get(2)?.as_str().parse().ok()?,
                    title: capture.get(3).map(|title| title.as_str().to_string()),
                })
            })
            .collect();

        Self { markers }
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// The marker with the largest offset not after `position`; positions
    /// before the first marker fall on locator 1.
    pub fn locate(&self, position: usize) -> Location {
        let following = self
            .markers
            .partition_point(|marker| marker.offset <= position);

        match following.checked_sub(1).map(|index| &self.markers[index]) {
            Some(marker) => Location {
                kind: marker.kind,
                locator: marker.locator,
                title: marker.title.clone(),
            },
            None => Location {
                kind: self
                    .markers
                    .first()
                    .map_or(MarkerKind::Page, |marker| marker.kind),
                locator: 1,
                title: None,
            },
        }
    }
}
