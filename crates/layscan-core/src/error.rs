//! Error types for the layscan-core library.

use thiserror::Error;

/// Main error type for the layscan library.
#[derive(Error, Debug)]
pub enum LayscanError {
    /// Layout schema error.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Region extraction or recognition error.
    #[error("region error: {0}")]
    Region(#[from] RegionError),

    /// Derived-value formula error.
    #[error("formula error: {0}")]
    Formula(#[from] FormulaError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input document error.
    #[error("document error: {0}")]
    Document(String),
}

/// Errors raised while loading or compiling a layout schema.
///
/// All of these are fatal: a run never starts with a schema that
/// cannot be compiled in full.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A bounding-box spec did not have four coordinate tokens.
    #[error("bad coordinate count in spec {spec:?}: expected 4, found {found}")]
    CoordinateCount { spec: String, found: usize },

    /// A coordinate token could not be parsed.
    #[error("malformed coordinate token {token:?} in spec {spec:?}")]
    BadCoordinate { spec: String, token: String },

    /// A region spec was not of the form `x,y w,h`.
    #[error("malformed region spec {0:?}: expected \"x,y w,h\"")]
    BadRegionSpec(String),

    /// Two field names normalize to the same identifier.
    #[error("fields {first:?} and {second:?} both normalize to {normalized:?}")]
    NameCollision {
        first: String,
        second: String,
        normalized: String,
    },

    /// Two sections share one name.
    #[error("duplicate section name {0:?}")]
    DuplicateSection(String),

    /// Failed to read or deserialize the schema file.
    #[error("failed to load schema: {0}")]
    Load(String),
}

/// Errors related to region extraction and recognition.
#[derive(Error, Debug)]
pub enum RegionError {
    /// The requested crop falls outside the source image.
    #[error("crop {0:?} out of bounds for {1}x{2} image")]
    OutOfBounds(String, u32, u32),

    /// The external recognition command failed to run or exited nonzero.
    #[error("recognition failed for {artifact}: {reason}")]
    Recognition { artifact: String, reason: String },

    /// Recognition ran but produced no text.
    ///
    /// A field-level failure; callers decide between sentinel fill and
    /// aborting the record.
    #[error("recognition produced no text for {0}")]
    EmptyRecognition(String),

    /// The cache store could not be read or written.
    #[error("cache store error for key {key}: {reason}")]
    Store { key: String, reason: String },
}

/// Errors raised while evaluating a derived-value formula.
///
/// Degenerate arithmetic (division by zero) is *not* represented here;
/// it degrades to an empty result at the evaluation site.
#[derive(Error, Debug)]
pub enum FormulaError {
    /// The formula references a field the record does not contain.
    #[error("unknown operand {0:?}")]
    UnknownOperand(String),

    /// A non-numeric value was used as an arithmetic operand.
    #[error("operand {name:?} holds non-numeric value {value:?}")]
    NonNumericOperand { name: String, value: String },

    /// The formula text itself could not be parsed.
    #[error("malformed formula {formula:?}: {reason}")]
    Parse { formula: String, reason: String },
}

/// Result type for the layscan library.
pub type Result<T> = std::result::Result<T, LayscanError>;
