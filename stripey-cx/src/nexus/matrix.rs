//! Character matrix construction

use super::ExportError;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Symbol for a unit the witness has no data for
pub const MISSING: char = '-';
/// Symbol for the empty reading (label 0)
pub const GAP: char = '?';

const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";

/// Character set used for reading labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alphabet {
    #[default]
    Letters,
    /// Restricted to 0-9 for tools that only accept digits
    Digits,
}

impl Alphabet {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "letters" => Some(Alphabet::Letters),
            "digits" => Some(Alphabet::Digits),
            _ => None,
        }
    }

    fn chars(&self) -> &'static str {
        match self {
            Alphabet::Letters => LETTERS,
            Alphabet::Digits => DIGITS,
        }
    }

    /// Symbol for reading label `label >= 1`
    pub fn symbol(&self, label: i64) -> Option<char> {
        if label < 1 {
            return None;
        }
        self.chars().chars().nth((label - 1) as usize)
    }
}

/// One variant unit in export order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRef {
    pub variant_id: i64,
    pub verse_id: i64,
    pub chapter: i64,
    pub verse: i64,
    pub variant_num: i64,
}

impl UnitRef {
    pub fn describe(&self) -> String {
        format!("{}:{} unit {}", self.chapter, self.verse, self.variant_num)
    }
}

/// What one witness/hand attests across the scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonData {
    pub label: String,
    /// Witness reference, matched by exclusion patterns
    pub witness_ref: String,
    /// Verses the taxon has a stripe in
    pub verses: HashSet<i64>,
    /// Reading label per variant id
    pub readings: HashMap<i64, i64>,
}

/// Units and taxa for one export
#[derive(Debug, Clone, Default)]
pub struct ExportScope {
    pub units: Vec<UnitRef>,
    pub taxa: Vec<TaxonData>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub alphabet: Alphabet,
    pub exclude: Vec<Regex>,
    /// Minimum share of the best-attested taxon's coverage, 0.0 keeps everyone
    pub fragmentary_threshold: f64,
}

/// A finished matrix: one row of `nchar` symbols per taxon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    pub rows: Vec<(String, String)>,
    pub nchar: usize,
    pub symbols: BTreeSet<char>,
}

/// Taxon label: sigla joined with the hand, restricted to NEXUS-safe characters
pub fn taxon_label(witness_short: &str, hand: &str) -> String {
    let raw = if hand == crate::witness::FIRSTHAND {
        witness_short.to_string()
    } else {
        format!("{}_{}", witness_short, hand)
    };
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the matrix for a scope
pub fn build_matrix(scope: &ExportScope, options: &ExportOptions) -> Result<Matrix, ExportError> {
    if scope.units.is_empty() {
        return Err(ExportError::EmptyScope);
    }

    let mut rows: Vec<(String, String, usize)> = Vec::new();
    for taxon in &scope.taxa {
        if options
            .exclude
            .iter()
            .any(|re| re.is_match(&taxon.witness_ref) || re.is_match(&taxon.label))
        {
            tracing::debug!(taxon = %taxon.label, "Excluded by pattern");
            continue;
        }

        let mut row = String::with_capacity(scope.units.len());
        let mut attested = 0;
        for unit in &scope.units {
            if !taxon.verses.contains(&unit.verse_id) {
                row.push(MISSING);
                continue;
            }
            let label = taxon
                .readings
                .get(&unit.variant_id)
                .copied()
                .ok_or_else(|| ExportError::MissingReading {
                    unit: unit.describe(),
                    taxon: taxon.label.clone(),
                })?;
            if label == 0 {
                row.push(GAP);
            } else {
                let symbol = options
                    .alphabet
                    .symbol(label)
                    .ok_or_else(|| ExportError::LabelOutOfRange {
                        unit: unit.describe(),
                        label,
                    })?;
                row.push(symbol);
                attested += 1;
            }
        }
        rows.push((taxon.label.clone(), row, attested));
    }

    let best = rows.iter().map(|(_, _, n)| *n).max().unwrap_or(0);
    if options.fragmentary_threshold > 0.0 && best > 0 {
        rows.retain(|(label, _, n)| {
            let keep = (*n as f64) / (best as f64) >= options.fragmentary_threshold;
            if !keep {
                tracing::info!(taxon = %label, attested = n, best, "Dropping fragmentary witness");
            }
            keep
        });
    }

    let nchar = scope.units.len();
    let mut symbols = BTreeSet::new();
    let mut used_labels = HashSet::new();
    let mut matrix_rows = Vec::with_capacity(rows.len());
    for (label, row, _) in rows {
        let found = row.chars().count();
        if found != nchar {
            return Err(ExportError::RowLength {
                taxon: label,
                expected: nchar,
                found,
            });
        }
        symbols.extend(row.chars().filter(|c| *c != MISSING && *c != GAP));

        let mut unique = label.clone();
        let mut n = 2;
        while !used_labels.insert(unique.clone()) {
            unique = format!("{}_{}", label, n);
            n += 1;
        }
        matrix_rows.push((unique, row));
    }

    Ok(Matrix {
        rows: matrix_rows,
        nchar,
        symbols,
    })
}
