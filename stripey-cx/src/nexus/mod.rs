//! NEXUS matrix export
//!
//! Serializes the stripes of a verse, chapter or book as a discrete-character
//! matrix: one taxon per witness/hand, one character per variant unit.

pub mod document;
pub mod matrix;

pub use document::render;
pub use matrix::{build_matrix, taxon_label, Alphabet, ExportOptions, ExportScope, Matrix, TaxonData, UnitRef, GAP, MISSING};

use thiserror::Error;

/// Export failures; all are fatal for the export
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Nothing to export: no variant units in scope")]
    EmptyScope,

    #[error("Taxon {taxon} has a stripe for the verse but no reading at {unit}")]
    MissingReading { unit: String, taxon: String },

    #[error("Reading label {label} at {unit} does not fit the chosen alphabet")]
    LabelOutOfRange { unit: String, label: i64 },

    #[error("Row for {taxon} has {found} characters, expected {expected}")]
    RowLength { taxon: String, expected: usize, found: usize },

    #[error("Invalid exclusion pattern: {0}")]
    BadPattern(#[from] regex::Error),
}
