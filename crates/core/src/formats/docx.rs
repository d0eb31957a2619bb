use crate::error::ExtractError;
use crate::formats::{estimate_pages, file_stem, ParsedDocument};
use crate::models::{Author, Body, Metadata, TocEntry};
use crate::segmenter::{segment_units, Boundary};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use zip::result::ZipError;
use zip::ZipArchive;

/// Maximum decompressed bytes read from a single package part.
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_PART: &str = "word/document.xml";
const STYLES_PART: &str = "word/styles.xml";
const CORE_PROPERTIES_PART: &str = "docProps/core.xml";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Paragraph {
    text: String,
    style: Option<String>,
}

fn corrupt(details: impl ToString) -> ExtractError {
    ExtractError::corrupt("docx", details)
}

pub fn parse(bytes: &[u8], source_name: &str) -> Result<ParsedDocument, ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;

    let document_xml = read_part(&mut archive, DOCUMENT_PART)?
        .ok_or_else(|| corrupt(format!("{DOCUMENT_PART} not found")))?;
    let style_names = match read_part(&mut archive, STYLES_PART)? {
        Some(xml) => parse_style_names(&xml)?,
        None => HashMap::new(),
    };
    let properties = match read_part(&mut archive, CORE_PROPERTIES_PART)? {
        Some(xml) => parse_core_properties(&xml)?,
        None => HashMap::new(),
    };

    let paragraphs = parse_paragraphs(&document_xml, &style_names)?;
    let toc = headings(&paragraphs);

    let boundaries: Vec<Boundary> = toc
        .iter()
        .map(|entry| Boundary {
            start: entry.locator.saturating_sub(1) as usize,
            title: entry.title.clone(),
            level: entry.level,
        })
        .collect();
    let sections = segment_units(&paragraphs, &boundaries, |slice| {
        slice
            .iter()
            .filter(|paragraph| !paragraph.text.trim().is_empty())
            .map(|paragraph| paragraph.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    });

    let total_text = sections
        .iter()
        .map(|section| section.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let paragraph_chars: usize = paragraphs
        .iter()
        .map(|paragraph| paragraph.text.chars().count())
        .sum();

    let mut metadata = metadata_from_properties(&properties, source_name);
    metadata.page_count = Some(estimate_pages(paragraph_chars));
    metadata.word_count = Some(total_text.split_whitespace().count() as u64);
    metadata.char_count = Some(total_text.chars().count() as u64);
    metadata
        .extra
        .insert("paragraph_count".to_string(), paragraphs.len().into());

    Ok(ParsedDocument {
        metadata,
        frontmatter: None,
        toc,
        body: Body::Sections(sections),
    })
}

fn read_part(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Option<Vec<u8>>, ExtractError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(error) => return Err(corrupt(error)),
    };

    let mut out = Vec::new();
    entry.take(MAX_PART_BYTES).read_to_end(&mut out).map_err(corrupt)?;
    if out.len() as u64 >= MAX_PART_BYTES {
        return Err(corrupt(format!("{name} exceeds size limit ({MAX_PART_BYTES} bytes)")));
    }
    Ok(Some(out))
}

fn attribute(element: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == local)
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

/// Top-level body paragraphs in order. Text boxes and table cells are not
/// part of the paragraph sequence; tabs and breaks inside runs become `\t`
/// and `\n`.
fn parse_paragraphs(
    xml: &[u8],
    style_names: &HashMap<String, String>,
) -> Result<Vec<Paragraph>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut paragraphs = Vec::new();
    let mut depth = 0usize;
    let mut body_depth: Option<usize> = None;
    let mut current: Option<Paragraph> = None;
    let mut paragraph_depth = 0usize;
    let mut nested_paragraphs = 0usize;
    let mut in_properties = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf).map_err(corrupt)? {
            Event::Start(element) => {
                depth += 1;
                let name = element.local_name();
                match name.as_ref() {
                    b"body" if body_depth.is_none() => body_depth = Some(depth),
                    b"p" if current.is_none() && body_depth.map(|d| d + 1) == Some(depth) => {
                        current = Some(Paragraph {
                            text: String::new(),
                            style: None,
                        });
                        paragraph_depth = depth;
                    }
                    b"p" if current.is_some() => nested_paragraphs += 1,
                    b"pPr" if nested_paragraphs == 0 => in_properties = true,
                    b"t" if current.is_some() && nested_paragraphs == 0 => in_text = true,
                    _ => {}
                }
            }
            Event::Empty(element) => {
                let top_level = body_depth.map(|d| d + 1) == Some(depth + 1);
                if current.is_none() && top_level && element.local_name().as_ref() == b"p" {
                    paragraphs.push(Paragraph {
                        text: String::new(),
                        style: None,
                    });
                } else if let Some(paragraph) = current.as_mut().filter(|_| nested_paragraphs == 0) {
                    match element.local_name().as_ref() {
                        b"pStyle" if in_properties => {
                            paragraph.style = attribute(&element, b"val");
                        }
                        b"tab" if !in_properties => paragraph.text.push('\t'),
                        b"br" | b"cr" if !in_properties => paragraph.text.push('\n'),
                        _ => {}
                    }
                }
            }
            Event::Text(text) if in_text => {
                if let Some(paragraph) = current.as_mut() {
                    paragraph.text.push_str(&text.unescape().map_err(corrupt)?);
                }
            }
            Event::End(element) => {
                match element.local_name().as_ref() {
                    b"t" => in_text = false,
                    b"pPr" if nested_paragraphs == 0 => in_properties = false,
                    b"p" if current.is_some() && depth == paragraph_depth => {
                        if let Some(mut paragraph) = current.take() {
                            paragraph.style = paragraph
                                .style
                                .map(|id| style_names.get(&id).cloned().unwrap_or(id));
                            paragraphs.push(paragraph);
                        }
                    }
                    b"p" if nested_paragraphs > 0 => nested_paragraphs -= 1,
                    b"body" => body_depth = None,
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

/// Style id to display name, e.g. `Heading1` to `Heading 1`.
fn parse_style_names(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut names = HashMap::new();
    let mut style_id: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(corrupt)? {
            Event::Start(element) if element.local_name().as_ref() == b"style" => {
                style_id = attribute(&element, b"styleId");
            }
            Event::Start(element) | Event::Empty(element)
                if element.local_name().as_ref() == b"name" =>
            {
                if let (Some(id), Some(name)) = (style_id.as_ref(), attribute(&element, b"val")) {
                    names.insert(id.clone(), display_style_name(&name));
                }
            }
            Event::End(element) if element.local_name().as_ref() == b"style" => style_id = None,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(names)
}

/// Built-in styles are stored lowercase (`heading 1`) but shown capitalised.
fn display_style_name(name: &str) -> String {
    match name.strip_prefix("heading ") {
        Some(rest) => format!("Heading {rest}"),
        None if name == "title" => "Title".to_string(),
        None => name.to_string(),
    }
}

/// `Heading <N>` style names; anything that does not parse to a level is
/// not a heading.
fn heading_level(style_name: &str) -> Option<u32> {
    if !style_name.starts_with("Heading") {
        return None;
    }
    style_name
        .replace("Heading ", "")
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|level| *level >= 1)
}

/// Locators are 1-based paragraph numbers. Breaks and tabs inside a heading
/// collapse to single spaces so the title fits on one marker line.
fn headings(paragraphs: &[Paragraph]) -> Vec<TocEntry> {
    paragraphs
        .iter()
        .enumerate()
        .filter_map(|(index, paragraph)| {
            let level = heading_level(paragraph.style.as_deref()?)?;
            let title = paragraph.text.split_whitespace().collect::<Vec<_>>().join(" ");
            (!title.is_empty()).then(|| TocEntry {
                level,
                title,
                locator: index as u32 + 1,
            })
        })
        .collect()
}

fn parse_core_properties(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut properties = HashMap::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf).map_err(corrupt)? {
            Event::Start(element) => {
                current = Some(String::from_utf8_lossy(element.local_name().as_ref()).into_owned());
            }
            Event::Text(text) => {
                if let Some(key) = current.as_ref() {
                    let value = text.unescape().map_err(corrupt)?;
                    properties
                        .entry(key.clone())
                        .or_insert_with(String::new)
                        .push_str(&value);
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(properties)
}

fn metadata_from_properties(properties: &HashMap<String, String>, source_name: &str) -> Metadata {
    let field = |key: &str| {
        properties
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let keywords = field("keywords")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|keyword| !keyword.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut metadata = Metadata {
        title: field("title").unwrap_or_else(|| file_stem(source_name)),
        author: field("creator").map(Author::Single),
        subject: field("subject"),
        keywords,
        ..Metadata::default()
    };

    metadata.set_extra("category", field("category"));
    metadata.set_extra("comments", field("description"));
    metadata.set_extra("created", field("created"));
    metadata.set_extra("modified", field("modified"));
    metadata.set_extra("last_modified_by", field("lastModifiedBy"));
    metadata
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Section;
    use std::io::Write;

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    /// `(style id, text)` pairs; an empty style id means a plain paragraph.
    pub(crate) fn build_docx(paragraphs: &[(&str, &str)], core_xml: Option<&str>) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|(style, text)| {
                let properties = if style.is_empty() {
                    String::new()
                } else {
                    format!("<w:pPr><w:pStyle w:val=\"{style}\"/><w:tabs><w:tab w:val=\"left\" w:pos=\"720\"/></w:tabs></w:pPr>")
                };
                format!("<w:p>{properties}<w:r><w:t xml:space=\"preserve\">{text}</w:t></w:r></w:p>")
            })
            .collect();
        let document = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"{W_NS}\"><w:body>{body}<w:sectPr/></w:body></w:document>"
        );
        let styles = format!(
            "<?xml version=\"1.0\"?><w:styles xmlns:w=\"{W_NS}\">\
             <w:style w:type=\"paragraph\" w:styleId=\"Heading1\"><w:name w:val=\"heading 1\"/></w:style>\
             <w:style w:type=\"paragraph\" w:styleId=\"Heading2\"><w:name w:val=\"heading 2\"/></w:style>\
             <w:style w:type=\"paragraph\" w:styleId=\"HeadingX\"><w:name w:val=\"Heading Extra\"/></w:style>\
             </w:styles>"
        );

        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let mut parts = vec![(DOCUMENT_PART, document), (STYLES_PART, styles)];
            if let Some(core) = core_xml {
                parts.push((CORE_PROPERTIES_PART, core.to_string()));
            }
            for (name, content) in parts {
                let options = zip::write::SimpleFileOptions::default();
                if zip.start_file(name, options).is_ok() {
                    let _ = zip.write_all(content.as_bytes());
                }
            }
            let _ = zip.finish();
        }
        buf
    }

    fn sections(parsed: &ParsedDocument) -> &[Section] {
        match &parsed.body {
            Body::Sections(sections) => sections,
            Body::Pages(_) => &[],
        }
    }

    #[test]
    fn heading_styles_drive_toc_and_sections() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = build_docx(
            &[
                ("", "Preamble"),
                ("Heading1", "Overview"),
                ("", "First body"),
                ("", "  "),
                ("HeadingX", "Not a heading"),
                ("Heading2", "Details"),
                ("", "Second body"),
            ],
            None,
        );
        let parsed = parse(&bytes, "guide.docx")?;

        assert_eq!(
            parsed.toc,
            vec![
                TocEntry { level: 1, title: "Overview".into(), locator: 2 },
                TocEntry { level: 2, title: "Details".into(), locator: 6 },
            ]
        );
        let sections = sections(&parsed);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].text, "Overview\n\nFirst body\n\nNot a heading");
        assert_eq!(sections[1].text, "Details\n\nSecond body");
        assert_eq!(
            parsed.metadata.extra.get("paragraph_count"),
            Some(&serde_json::Value::from(7))
        );
        Ok(())
    }

    #[test]
    fn line_broken_heading_keeps_section_identity() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = build_docx(
            &[
                ("Heading1", "Intro"),
                ("", "hello"),
                ("Heading1", "Usage</w:t><w:br/><w:t>Notes"),
                ("", "find the needle here"),
            ],
            None,
        );
        let record = crate::formats::extract_named(&bytes, "broken.docx", &Default::default())?;

        assert_eq!(record.toc[1].title, "Usage Notes");
        assert_eq!(record.toc[1].locator, 3);

        let text = record.rendered_text.clone().unwrap_or_default();
        let regex = crate::search::compile_pattern("needle", false, false)?;
        let found = crate::search::search_text(&text, &regex, 20);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].location.locator, 2);
        assert_eq!(found[0].location.title.as_deref(), Some("Usage Notes"));
        Ok(())
    }

    #[test]
    fn no_headings_yield_content_section() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = build_docx(&[("", "alpha"), ("", ""), ("", "beta")], None);
        let parsed = parse(&bytes, "plain.docx")?;
        let sections = sections(&parsed);

        assert_eq!(parsed.metadata.title, "plain");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Content");
        assert_eq!(sections[0].text, "alpha\n\nbeta");
        Ok(())
    }

    #[test]
    fn page_estimate_uses_floor_division() -> Result<(), Box<dyn std::error::Error>> {
        for (chars, expected) in [(2999usize, 1u32), (3000, 2), (6000, 3)] {
            let text = "x".repeat(chars);
            let bytes = build_docx(&[("", text.as_str())], None);
            let parsed = parse(&bytes, "sized.docx")?;
            assert_eq!(parsed.metadata.page_count, Some(expected), "{chars} chars");
        }
        Ok(())
    }

    #[test]
    fn core_properties_become_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let core = "<?xml version=\"1.0\"?><cp:coreProperties \
            xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" \
            xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:dcterms=\"http://purl.org/dc/terms/\">\
            <dc:title>Quarterly &amp; Annual</dc:title><dc:creator>Jo</dc:creator>\
            <cp:keywords>alpha, beta</cp:keywords><cp:category>Reports</cp:category>\
            <dcterms:created>2024-01-02T03:04:05Z</dcterms:created></cp:coreProperties>";
        let bytes = build_docx(&[("", "body")], Some(core));
        let parsed = parse(&bytes, "q.docx")?;

        assert_eq!(parsed.metadata.title, "Quarterly & Annual");
        assert_eq!(parsed.metadata.author, Some(Author::Single("Jo".into())));
        assert_eq!(parsed.metadata.keywords, vec!["alpha", "beta"]);
        assert_eq!(
            parsed.metadata.extra.get("created"),
            Some(&serde_json::Value::String("2024-01-02T03:04:05Z".into()))
        );
        assert_eq!(parsed.metadata.extra.get("comments"), Some(&serde_json::Value::Null));
        Ok(())
    }

    #[test]
    fn heading_level_parsing() {
        assert_eq!(heading_level("Heading 3"), Some(3));
        assert_eq!(heading_level("Heading Extra"), None);
        assert_eq!(heading_level("Heading 0"), None);
        assert_eq!(heading_level("Normal"), None);
    }

    #[test]
    fn non_zip_bytes_are_corrupt() {
        let result = parse(b"not a zip archive", "x.docx");
        assert!(matches!(result, Err(ExtractError::CorruptSource { format: "docx", .. })));
    }

    #[test]
    fn zip_without_document_part_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())?;
            zip.write_all(b"<x/>")?;
            zip.finish()?;
        }
        assert!(matches!(
            parse(&buf, "x.docx"),
            Err(ExtractError::CorruptSource { .. })
        ));
        Ok(())
    }
}
