use crate::models::Section;
use std::ops::Range;

/// Title of the single section emitted when a document has no headings.
pub const FALLBACK_SECTION_TITLE: &str = "Content";

/// A cut point over a sequence of units (lines, paragraphs, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    /// Zero-based index of the first unit of the section.
    pub start: usize,
    pub title: String,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpan {
    /// One-based, contiguous.
    pub index: u32,
    pub title: String,
    pub level: u32,
    pub units: Range<usize>,
}

/// Partitions `0..unit_count` at the given boundaries, in the order given.
///
/// Section `i` runs from its boundary to the next boundary (exclusive); the
/// last one runs to the end. Units before the first boundary belong to no
/// section. Without boundaries a single synthetic section covers everything.
pub fn segment(unit_count: usize, boundaries: &[Boundary]) -> Vec<SectionSpan> {
    if boundaries.is_empty() {
        return vec![SectionSpan {
            index: 1,
            title: FALLBACK_SECTION_TITLE.to_string(),
            level: 1,
            units: 0..unit_count,
        }];
    }

    boundaries
        .iter()
        .enumerate()
        .map(|(position, boundary)| {
            let start = boundary.start.min(unit_count);
            let end = boundaries
                .get(position + 1)
                .map_or(unit_count, |next| next.start.min(unit_count))
                .max(start);

            SectionSpan {
                index: (position + 1) as u32,
                title: boundary.title.clone(),
                level: boundary.level,
                units: start..end,
            }
        })
        .collect()
}

/// Runs [`segment`] and renders each span's units into section text.
pub fn segment_units<T, F>(units: &[T], boundaries: &[Boundary], render: F) -> Vec<Section>
where
    F: Fn(&[T]) -> String,
{
    segment(units.len(), boundaries)
        .into_iter()
        .map(|span| Section {
            index: span.index,
            title: span.title,
            level: span.level,
            text: render(&units[span.units]),
        })
        .collect()
}
