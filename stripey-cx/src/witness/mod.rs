//! Witness text extraction
//!
//! Parses one manuscript's TEI markup into chapters and verses, and resolves
//! the composite text of every hand that touched each verse.

pub mod manuscript;
pub mod parser;
pub mod snippet;

pub use manuscript::{Chapter, Manuscript, Verse, VerseText};
pub use parser::VerseParser;
pub use snippet::{HandKey, HandOrder, HandResolutionError, HandType, Readings, Snippet, FIRSTHAND};

use thiserror::Error;

/// Markup that does not match the expected document structure
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML syntax error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("<{element}> without an 'n' attribute")]
    MissingNumber { element: String },

    #[error("Cannot parse a number from '{0}'")]
    BadNumber(String),

    #[error("Unexpected <{tag}> inside <app> at {chapter}:{verse}; only <rdg> is allowed")]
    UnexpectedInApparatus { tag: String, chapter: u32, verse: u32 },

    #[error("<rdg> without a hand at {chapter}:{verse} (type {kind:?})")]
    MissingReadingHand {
        kind: Option<String>,
        chapter: u32,
        verse: u32,
    },

    #[error("<rdg> for hand '{hand}' without a type at {chapter}:{verse}")]
    MissingReadingType { hand: String, chapter: u32, verse: u32 },

    #[error("<altIdentifier> without a type attribute")]
    MissingIdentifierType,

    #[error(transparent)]
    Hand(#[from] HandResolutionError),
}
