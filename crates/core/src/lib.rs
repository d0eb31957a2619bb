pub mod batch;
pub mod error;
pub mod formats;
pub mod hasher;
pub mod indexer;
pub mod markers;
pub mod models;
pub mod render;
pub mod search;
pub mod segmenter;

pub use batch::{
    collect_batch_files, extract_file, run_batch, run_batch_parallel, write_error_log,
    BatchReport, ExtractedFile, ERROR_LOG_FILE_NAME,
};
pub use error::{ExtractError, Result};
pub use formats::{estimate_pages, extract_bytes, extract_named, extract_path, CHARS_PER_PAGE};
pub use hasher::{hash_bytes, hash_file, hash_reader};
pub use indexer::{
    build_catalog, build_index, default_index_path, discover_documents, load_catalog,
    lookup_entry, render_catalog, save_catalog, EntrySource, IndexReport, IndexStats,
    INDEX_FILE_NAME,
};
pub use markers::{page_marker, section_marker, Location, MarkerKind, MarkerMap};
pub use models::{
    Author, BatchOptions, Body, ExtractOptions, ExtractionRecord, FileSearchResult, FileType,
    IndexEntry, IndexOptions, LibraryCatalog, LocatorUnit, Metadata, OutputFormat, OutputOptions,
    Page, SearchMatch, SearchOptions, SearchReport, Section, SkippedFile, TocEntry,
    DEFAULT_CONTEXT_CHARS, SUPPORTED_EXTENSIONS,
};
pub use render::{format_toc, render_text, write_artifacts};
pub use search::{
    compile_pattern, context_window, format_report, search_artifacts, search_library, ContextWindow,
};
pub use segmenter::{segment, segment_units, Boundary, SectionSpan};
