//! Critical apparatus construction
//!
//! Turns the oracle's alignment table for one verse into variant units,
//! labelled readings and stripes, ready to be persisted in one transaction.

pub mod builder;

pub use builder::{alignment_request, build_apparatus, collate_verse, VerseContext};

use crate::oracle::OracleError;
use thiserror::Error;

/// Apparatus construction errors
#[derive(Debug, Error)]
pub enum ApparatusError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("Alignment names witness '{0}', which was not submitted")]
    UnknownWitness(String),

    #[error("Alignment lists witness '{0}' more than once")]
    DuplicateWitness(String),

    #[error("Alignment omits submitted witness {0}")]
    MissingWitness(i64),

    #[error("Alignment row {row} has {found} cells, expected {expected}")]
    RowWidth { row: usize, expected: usize, found: usize },
}

/// One witness/hand occurrence of a verse with its resolved text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub ms_verse_id: i64,
    pub text: String,
}

/// A distinct reading at one unit; label 0 is the empty reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReading {
    pub label: i64,
    pub text: String,
}

/// One alignment row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    pub variant_num: i64,
    pub readings: Vec<PlannedReading>,
}

impl PlannedUnit {
    pub fn reading(&self, label: i64) -> Option<&PlannedReading> {
        self.readings.iter().find(|r| r.label == label)
    }
}

/// A distinct reading profile and the occurrences sharing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStripe {
    /// One reading label per unit, in unit order
    pub labels: Vec<i64>,
    pub members: Vec<i64>,
}

/// Everything to be written for one verse and algorithm
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApparatusPlan {
    pub units: Vec<PlannedUnit>,
    pub stripes: Vec<PlannedStripe>,
}

impl ApparatusPlan {
    /// Stripe an occurrence belongs to
    pub fn stripe_of(&self, ms_verse_id: i64) -> Option<&PlannedStripe> {
        self.stripes.iter().find(|s| s.members.contains(&ms_verse_id))
    }

    /// Reading text an occurrence has at one unit
    pub fn reading_text(&self, ms_verse_id: i64, unit: usize) -> Option<&str> {
        let stripe = self.stripe_of(ms_verse_id)?;
        let label = *stripe.labels.get(unit)?;
        self.units
            .get(unit)?
            .reading(label)
            .map(|r| r.text.as_str())
    }
}
