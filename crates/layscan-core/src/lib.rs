//! Core library for layout-based field extraction.
//!
//! This crate provides:
//! - Fuzzy bounding-box matching tolerant of small positional drift
//! - Per-page field resolution over positioned-text documents
//! - A content-addressed region crop and recognition cache for the
//!   image pipeline
//! - Derived-value formulas evaluated over sibling fields
//! - Ordered table assembly for batch output

pub mod discover;
pub mod error;
pub mod formula;
pub mod matcher;
pub mod region;
pub mod resolver;
pub mod schema;
pub mod table;
pub mod vector;

pub use discover::{discover_documents, DocumentPages};
pub use error::{FormulaError, LayscanError, RegionError, Result, SchemaError};
pub use formula::{evaluate, is_derived, normalize_name, resolve_derived, Environment, Value};
pub use matcher::{BoundingBox, BoxMatcher, MatcherCache, DEFAULT_TOLERANCE};
pub use region::{
    parse_region_spec, region_key, CacheStore, CropBox, FsStore, MemoryStore, RecognitionEngine,
    RegionExtractor, RegionRecognizer, TesseractEngine,
};
pub use resolver::{resolve_document, resolve_page, PositionedElement, SENTINEL};
pub use schema::{CompiledField, CompiledSection, FieldSpec, LayoutSchema, Section};
pub use table::{assemble, group_by_section, RecordBatch, RecordEntry, Table};
pub use vector::VectorDocument;
