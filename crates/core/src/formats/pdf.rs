use crate::error::ExtractError;
use crate::formats::{file_stem, ParsedDocument};
use crate::models::{Author, Body, Metadata, Page, TocEntry};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Guards outline and name-tree recursion against malformed files.
const MAX_OUTLINE_DEPTH: u32 = 64;

pub fn parse(bytes: &[u8], source_name: &str) -> Result<ParsedDocument, ExtractError> {
    let document = Document::load_mem(bytes).map_err(|error| ExtractError::corrupt("pdf", error))?;
    let page_ids = document.get_pages();

    let metadata = read_metadata(&document, source_name, page_ids.len() as u32);
    let toc = read_outline(&document, &page_ids);
    let pages = extract_pages(&document, &page_ids);

    Ok(ParsedDocument {
        metadata,
        frontmatter: None,
        toc,
        body: Body::Pages(pages),
    })
}

/// Pages come out in document order; a page without readable text yields an
/// empty string instead of failing the document.
fn extract_pages(document: &Document, page_ids: &BTreeMap<u32, ObjectId>) -> Vec<Page> {
    page_ids
        .keys()
        .enumerate()
        .map(|(position, page_no)| {
            let text = match document.extract_text(&[*page_no]) {
                Ok(text) => text.trim().to_string(),
                Err(error) => {
                    debug!(page = page_no, %error, "page has no extractable text");
                    String::new()
                }
            };

            Page {
                page: position as u32 + 1,
                text,
            }
        })
        .collect()
}

fn read_metadata(document: &Document, source_name: &str, page_count: u32) -> Metadata {
    let info = document
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|info| resolve(document, info).as_dict().ok());

    let field = |key: &[u8]| info.and_then(|dict| text_field(document, dict, key));

    let keywords = field(b"Keywords")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|keyword| !keyword.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut metadata = Metadata {
        title: field(b"Title").unwrap_or_else(|| file_stem(source_name)),
        author: field(b"Author").map(Author::Single),
        subject: field(b"Subject"),
        keywords,
        page_count: Some(page_count),
        ..Metadata::default()
    };

    metadata.set_extra("publisher", field(b"Producer"));
    metadata.set_extra("creator", field(b"Creator"));
    metadata.set_extra("creation_date", field(b"CreationDate"));
    metadata.set_extra("modification_date", field(b"ModDate"));
    metadata
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => document.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn root_dictionary(document: &Document) -> Option<&Dictionary> {
    let root = document.trailer.get(b"Root").ok()?;
    resolve(document, root).as_dict().ok()
}

/// Non-empty text value of a dictionary entry.
fn text_field(document: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    let text = match resolve(document, dict.get(key).ok()?) {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
        _ => return None,
    };

    let text = text.trim_end_matches('\0').trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// PDF text strings are UTF-16BE when they carry a byte order mark and
/// PDFDocEncoding (close enough to Latin-1 for metadata) otherwise.
pub(crate) fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).into_owned();
    }

    bytes.iter().map(|byte| char::from(*byte)).collect()
}

/// Outline entries as `(level, title, page)`, passed through in document
/// order without checking level monotonicity. Unresolvable destinations
/// get locator 0.
fn read_outline(document: &Document, page_ids: &BTreeMap<u32, ObjectId>) -> Vec<TocEntry> {
    let page_numbers: HashMap<ObjectId, u32> =
        page_ids.iter().map(|(number, id)| (*id, *number)).collect();

    let first = root_dictionary(document)
        .and_then(|root| root.get(b"Outlines").ok())
        .and_then(|outlines| resolve(document, outlines).as_dict().ok())
        .and_then(|outlines| outlines.get(b"First").ok());

    let mut walker = OutlineWalker {
        document,
        page_numbers: &page_numbers,
        visited: HashSet::new(),
        entries: Vec::new(),
    };
    walker.walk(first, 1);
    walker.entries
}

struct OutlineWalker<'a> {
    document: &'a Document,
    page_numbers: &'a HashMap<ObjectId, u32>,
    visited: HashSet<ObjectId>,
    entries: Vec<TocEntry>,
}

impl<'a> OutlineWalker<'a> {
    fn walk(&mut self, mut next: Option<&'a Object>, level: u32) {
        if level > MAX_OUTLINE_DEPTH {
            return;
        }

        while let Some(Object::Reference(id)) = next {
            if !self.visited.insert(*id) {
                break;
            }
            let Ok(item) = self.document.get_object(*id).and_then(Object::as_dict) else {
                break;
            };

            self.entries.push(TocEntry {
                level,
                title: text_field(self.document, item, b"Title").unwrap_or_default(),
                locator: self.destination_page(item).unwrap_or(0),
            });

            self.walk(item.get(b"First").ok(), level + 1);
            next = item.get(b"Next").ok();
        }
    }

    fn destination_page(&self, item: &'a Dictionary) -> Option<u32> {
        let target = match item.get(b"Dest") {
            Ok(dest) => dest,
            Err(_) => {
                let action = resolve(self.document, item.get(b"A").ok()?).as_dict().ok()?;
                action.get(b"D").ok()?
            }
        };
        self.page_of(resolve(self.document, target), 0)
    }

    fn page_of(&self, target: &'a Object, depth: u32) -> Option<u32> {
        if depth > MAX_OUTLINE_DEPTH {
            return None;
        }

        match target {
            Object::Array(items) => match items.first()? {
                Object::Reference(id) => self.page_numbers.get(id).copied(),
                Object::Integer(index) => index.checked_add(1).and_then(|page| u32::try_from(page).ok()),
                _ => None,
            },
            Object::Dictionary(dict) => {
                self.page_of(resolve(self.document, dict.get(b"D").ok()?), depth + 1)
            }
            Object::String(name, _) | Object::Name(name) => {
                let named = self.named_destination(name)?;
                self.page_of(named, depth + 1)
            }
            _ => None,
        }
    }

    /// Looks a destination name up in the catalog's `/Dests` dictionary, then
    /// in the `/Names /Dests` name tree.
    fn named_destination(&self, name: &[u8]) -> Option<&'a Object> {
        let root = root_dictionary(self.document)?;

        let legacy = root
            .get(b"Dests")
            .ok()
            .and_then(|dests| resolve(self.document, dests).as_dict().ok())
            .and_then(|dests| dests.get(name).ok());
        if let Some(found) = legacy {
            return Some(resolve(self.document, found));
        }

        let names = resolve(self.document, root.get(b"Names").ok()?).as_dict().ok()?;
        let tree = resolve(self.document, names.get(b"Dests").ok()?).as_dict().ok()?;
        self.lookup_name_tree(tree, name, 0)
    }

    fn lookup_name_tree(&self, node: &'a Dictionary, name: &[u8], depth: u32) -> Option<&'a Object> {
        if depth > MAX_OUTLINE_DEPTH {
            return None;
        }

        if let Ok(pairs) = node.get(b"Names").and_then(Object::as_array) {
            for pair in pairs.chunks_exact(2) {
                if let Object::String(key, _) = resolve(self.document, &pair[0]) {
                    if key.as_slice() == name {
                        return Some(resolve(self.document, &pair[1]));
                    }
                }
            }
        }

        let kids = node.get(b"Kids").and_then(Object::as_array).ok()?;
        kids.iter().find_map(|kid| {
            let kid = resolve(self.document, kid).as_dict().ok()?;
            self.lookup_name_tree(kid, name, depth + 1)
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream, StringFormat};

    /// Builds a PDF whose pages each show one line of text.
    pub(crate) fn build_pdf(page_texts: &[&str], info: Option<Dictionary>) -> Vec<u8> {
        build_pdf_with_outline(page_texts, info, &[])
    }

    pub(crate) fn build_pdf_with_outline(
        page_texts: &[&str],
        info: Option<Dictionary>,
        outline: &[(&str, usize)],
    ) -> Vec<u8> {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let font_id = document.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = document.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for text in page_texts {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let encoded = content.encode().unwrap_or_default();
            let content_id = document.add_object(Stream::new(dictionary! {}, encoded));
            let page_id = document.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(page_id);
        }

        document.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
                "Count" => kids.len() as i64,
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };

        if !outline.is_empty() {
            let outlines_id = document.new_object_id();
            let item_ids: Vec<ObjectId> = outline.iter().map(|_| document.new_object_id()).collect();
            for (position, (title, page_index)) in outline.iter().enumerate() {
                let mut item = dictionary! {
                    "Title" => Object::String(title.as_bytes().to_vec(), StringFormat::Literal),
                    "Parent" => outlines_id,
                    "Dest" => vec![Object::Reference(kids[*page_index]), "Fit".into()],
                };
                if let Some(next) = item_ids.get(position + 1) {
                    item.set("Next", *next);
                }
                document.objects.insert(item_ids[position], Object::Dictionary(item));
            }
            document.objects.insert(
                outlines_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Outlines",
                    "First" => item_ids[0],
                    "Last" => item_ids[item_ids.len() - 1],
                    "Count" => item_ids.len() as i64,
                }),
            );
            catalog.set("Outlines", outlines_id);
        }

        let catalog_id = document.add_object(catalog);
        document.trailer.set("Root", catalog_id);
        if let Some(info) = info {
            let info_id = document.add_object(info);
            document.trailer.set("Info", info_id);
        }

        let mut bytes = Vec::new();
        document.save_to(&mut bytes).unwrap_or_default();
        bytes
    }

    #[test]
    fn metadata_falls_back_to_file_stem() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = build_pdf(&["Hello"], None);
        let parsed = parse(&bytes, "reports/annual.pdf")?;

        assert_eq!(parsed.metadata.title, "annual");
        assert_eq!(parsed.metadata.author, None);
        assert_eq!(parsed.metadata.page_count, Some(1));
        assert!(parsed.toc.is_empty());
        Ok(())
    }

    #[test]
    fn info_dictionary_fields_are_read_and_keywords_split() -> Result<(), Box<dyn std::error::Error>> {
        let info = dictionary! {
            "Title" => Object::string_literal("Field Manual"),
            "Author" => Object::string_literal("A. Writer"),
            "Keywords" => Object::string_literal(" pumps, valves ,, seals "),
            "Producer" => Object::string_literal("Typesetter 2"),
        };
        let bytes = build_pdf(&["one", "two", "three"], Some(info));
        let parsed = parse(&bytes, "manual.pdf")?;

        assert_eq!(parsed.metadata.title, "Field Manual");
        assert_eq!(parsed.metadata.author, Some(Author::Single("A. Writer".into())));
        assert_eq!(parsed.metadata.keywords, vec!["pumps", "valves", "seals"]);
        assert_eq!(parsed.metadata.page_count, Some(3));
        assert_eq!(
            parsed.metadata.extra.get("publisher"),
            Some(&serde_json::Value::String("Typesetter 2".into()))
        );
        assert_eq!(parsed.metadata.extra.get("creator"), Some(&serde_json::Value::Null));
        Ok(())
    }

    #[test]
    fn pages_are_numbered_contiguously_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = build_pdf(&["Alpha text", "Beta text"], None);
        let parsed = parse(&bytes, "two.pdf")?;

        let Body::Pages(pages) = parsed.body else {
            return Err("pdf should produce pages".into());
        };
        assert_eq!(pages.iter().map(|page| page.page).collect::<Vec<_>>(), vec![1, 2]);
        assert!(pages[0].text.contains("Alpha"));
        assert!(pages[1].text.contains("Beta"));
        Ok(())
    }

    #[test]
    fn outline_is_passed_through_with_page_numbers() -> Result<(), Box<dyn std::error::Error>> {
        let bytes = build_pdf_with_outline(
            &["a", "b", "c"],
            None,
            &[("Preface", 0), ("Chapter 1", 2)],
        );
        let parsed = parse(&bytes, "book.pdf")?;

        assert_eq!(
            parsed.toc,
            vec![
                TocEntry { level: 1, title: "Preface".into(), locator: 1 },
                TocEntry { level: 1, title: "Chapter 1".into(), locator: 3 },
            ]
        );
        Ok(())
    }

    #[test]
    fn integer_destinations_do_not_overflow() {
        let huge = Object::Array(vec![Object::Integer(i64::MAX), "Fit".into()]);
        let third = Object::Array(vec![Object::Integer(2), "Fit".into()]);
        let negative = Object::Array(vec![Object::Integer(-5), "Fit".into()]);
        let document = Document::with_version("1.5");
        let page_numbers = HashMap::new();
        let walker = OutlineWalker {
            document: &document,
            page_numbers: &page_numbers,
            visited: HashSet::new(),
            entries: Vec::new(),
        };

        assert_eq!(walker.page_of(&huge, 0), None);
        assert_eq!(walker.page_of(&negative, 0), None);
        assert_eq!(walker.page_of(&third, 0), Some(3));
    }

    #[test]
    fn broken_bytes_are_a_corrupt_source() {
        let result = parse(b"%PDF-1.4\n%broken", "broken.pdf");
        assert!(matches!(result, Err(ExtractError::CorruptSource { format: "pdf", .. })));
    }

    #[test]
    fn utf16_strings_are_decoded() {
        let bytes = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69];
        assert_eq!(decode_pdf_string(&bytes), "Hi");
        assert_eq!(decode_pdf_string(b"caf\xe9"), "café");
    }
}
