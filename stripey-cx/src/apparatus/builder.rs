//! Apparatus builder

use super::{ApparatusError, ApparatusPlan, Occurrence, PlannedReading, PlannedStripe, PlannedUnit};
use crate::oracle::{AlignmentOracle, AlignmentRequest, AlignmentResponse, Algorithm, WitnessContent};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Reading labels for one unit, assigned in order of first appearance
#[derive(Debug, Default)]
struct UnitReadings {
    by_text: HashMap<String, i64>,
    readings: Vec<PlannedReading>,
    next_label: i64,
}

impl UnitReadings {
    fn new() -> Self {
        Self {
            next_label: 1,
            ..Self::default()
        }
    }

    fn label_for(&mut self, text: &str) -> i64 {
        if let Some(label) = self.by_text.get(text) {
            return *label;
        }
        let label = if text.is_empty() {
            0
        } else {
            let label = self.next_label;
            self.next_label += 1;
            label
        };
        self.by_text.insert(text.to_string(), label);
        self.readings.push(PlannedReading {
            label,
            text: text.to_string(),
        });
        label
    }
}

/// Verse-local state while building an apparatus
///
/// Holds reading identities per unit and the reading profile accumulated for
/// every occurrence. Nothing here outlives the verse.
#[derive(Debug, Default)]
pub struct VerseContext {
    units: Vec<UnitReadings>,
    profiles: Vec<(i64, Vec<i64>)>,
}

impl VerseContext {
    pub fn new(occurrence_ids: &[i64]) -> Self {
        Self {
            units: Vec::new(),
            profiles: occurrence_ids.iter().map(|id| (*id, Vec::new())).collect(),
        }
    }

    fn add_unit(&mut self) -> usize {
        self.units.push(UnitReadings::new());
        self.units.len() - 1
    }

    fn record(&mut self, unit: usize, column: usize, text: &str) {
        let label = self.units[unit].label_for(text);
        self.profiles[column].1.push(label);
    }

    /// Collapse identical profiles into stripes, in order of first appearance
    fn finish(self) -> ApparatusPlan {
        let units = self
            .units
            .into_iter()
            .enumerate()
            .map(|(i, u)| PlannedUnit {
                variant_num: i as i64,
                readings: u.readings,
            })
            .collect();

        let mut stripes: Vec<PlannedStripe> = Vec::new();
        let mut index: HashMap<Vec<i64>, usize> = HashMap::new();
        for (ms_verse_id, labels) in self.profiles {
            match index.get(&labels) {
                Some(&i) => stripes[i].members.push(ms_verse_id),
                None => {
                    index.insert(labels.clone(), stripes.len());
                    stripes.push(PlannedStripe {
                        labels,
                        members: vec![ms_verse_id],
                    });
                }
            }
        }

        ApparatusPlan { units, stripes }
    }
}

/// Request for the non-empty occurrences of a verse, or None if there are none
pub fn alignment_request(
    occurrences: &[Occurrence],
    algorithm: Algorithm,
    fuzzy_edit_distance: u32,
) -> Option<AlignmentRequest> {
    let witnesses: Vec<WitnessContent> = occurrences
        .iter()
        .filter(|o| !o.text.trim().is_empty())
        .map(|o| WitnessContent {
            id: o.ms_verse_id.to_string(),
            content: o.text.clone(),
        })
        .collect();

    if witnesses.is_empty() {
        None
    } else {
        Some(AlignmentRequest::new(witnesses, algorithm, fuzzy_edit_distance))
    }
}

/// Derive units, readings and stripes from an alignment table
///
/// Each row becomes a unit (ordinal = row index). A cell's tokens are trimmed
/// and space-joined into the reading text. Every submitted occurrence must
/// appear exactly once among the table's witnesses.
pub fn build_apparatus(request: &AlignmentRequest, response: &AlignmentResponse) -> Result<ApparatusPlan, ApparatusError> {
    let submitted: HashSet<&str> = request.witnesses.iter().map(|w| w.id.as_str()).collect();

    let mut columns = Vec::with_capacity(response.witnesses.len());
    let mut seen = HashSet::new();
    for sigil in &response.witnesses {
        if !submitted.contains(sigil.as_str()) {
            return Err(ApparatusError::UnknownWitness(sigil.clone()));
        }
        if !seen.insert(sigil.as_str()) {
            return Err(ApparatusError::DuplicateWitness(sigil.clone()));
        }
        let id: i64 = sigil
            .parse()
            .map_err(|_| ApparatusError::UnknownWitness(sigil.clone()))?;
        columns.push(id);
    }
    if let Some(missing) = request.witnesses.iter().find(|w| !seen.contains(w.id.as_str())) {
        let id = missing.id.parse().unwrap_or_default();
        return Err(ApparatusError::MissingWitness(id));
    }

    let mut ctx = VerseContext::new(&columns);
    for (row_idx, row) in response.table.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(ApparatusError::RowWidth {
                row: row_idx,
                expected: columns.len(),
                found: row.len(),
            });
        }

        let unit = ctx.add_unit();
        for (column, cell) in row.iter().enumerate() {
            let text = cell
                .iter()
                .map(|token| token.trim())
                .collect::<Vec<_>>()
                .join(" ");
            ctx.record(unit, column, &text);
        }
    }

    Ok(ctx.finish())
}

/// Align one verse and build its apparatus
///
/// Returns `Ok(None)` when no occurrence has any text.
pub async fn collate_verse(
    oracle: &dyn AlignmentOracle,
    occurrences: &[Occurrence],
    algorithm: Algorithm,
    fuzzy_edit_distance: u32,
) -> Result<Option<ApparatusPlan>, ApparatusError> {
    let Some(request) = alignment_request(occurrences, algorithm, fuzzy_edit_distance) else {
        return Ok(None);
    };

    let response = oracle.align(&request).await?;
    debug!(
        units = response.table.len(),
        witnesses = response.witnesses.len(),
        "Oracle produced alignment"
    );

    build_apparatus(&request, &response).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(id: i64, text: &str) -> Occurrence {
        Occurrence {
            ms_verse_id: id,
            text: text.to_string(),
        }
    }

    fn cells(row: &[&[&str]]) -> Vec<Vec<String>> {
        row.iter()
            .map(|cell| cell.iter().map(|t| t.to_string()).collect())
            .collect()
    }

    /// Dekker alignment of "This is a test" / "This is test"
    fn two_witness_case() -> (AlignmentRequest, AlignmentResponse) {
        let request = alignment_request(&[occ(1, "This is a test"), occ(2, "This is test")], Algorithm::Dekker, 0).unwrap();
        let response = AlignmentResponse {
            witnesses: vec!["1".into(), "2".into()],
            table: vec![
                cells(&[&["This ", "is "], &["This ", "is "]]),
                cells(&[&["a "], &[]]),
                cells(&[&["test"], &["test"]]),
            ],
        };
        (request, response)
    }

    #[test]
    fn test_empty_texts_not_submitted() {
        let request = alignment_request(&[occ(1, "και"), occ(2, "  "), occ(3, "")], Algorithm::Dekker, 3).unwrap();
        assert_eq!(request.witnesses.len(), 1);
        assert_eq!(request.witnesses[0].id, "1");

        assert!(alignment_request(&[occ(4, "")], Algorithm::Dekker, 3).is_none());
    }

    #[test]
    fn test_omission_gets_label_zero() {
        let (request, response) = two_witness_case();
        let plan = build_apparatus(&request, &response).unwrap();

        assert_eq!(plan.units.len(), 3);
        assert_eq!(plan.reading_text(1, 1), Some("a"));
        assert_eq!(plan.reading_text(2, 1), Some(""));
        assert_eq!(plan.units[1].reading(0).map(|r| r.text.as_str()), Some(""));
        assert_eq!(plan.units[1].reading(1).map(|r| r.text.as_str()), Some("a"));

        // Shared readings elsewhere
        assert_eq!(plan.reading_text(1, 0), Some("This is"));
        assert_eq!(plan.reading_text(2, 0), Some("This is"));
        assert_eq!(plan.units[0].readings.len(), 1);
        assert_eq!(plan.units[2].readings.len(), 1);
    }

    #[test]
    fn test_identical_profiles_share_a_stripe() {
        let request = alignment_request(
            &[occ(10, "a b"), occ(11, "a c"), occ(12, "a b")],
            Algorithm::Dekker,
            0,
        )
        .unwrap();
        let response = AlignmentResponse {
            witnesses: vec!["10".into(), "11".into(), "12".into()],
            table: vec![
                cells(&[&["a "], &["a "], &["a "]]),
                cells(&[&["b"], &["c"], &["b"]]),
            ],
        };
        let plan = build_apparatus(&request, &response).unwrap();

        assert_eq!(plan.stripes.len(), 2);
        assert_eq!(plan.stripes[0].members, vec![10, 12]);
        assert_eq!(plan.stripes[1].members, vec![11]);
        for stripe in &plan.stripes {
            assert_eq!(stripe.labels.len(), plan.units.len());
        }
        let distinct: HashSet<_> = plan.stripes.iter().map(|s| s.labels.clone()).collect();
        assert_eq!(distinct.len(), plan.stripes.len());
    }

    #[test]
    fn test_dekker_five_witness_sample() {
        let request = alignment_request(
            &[
                occ(1, "This is a test"),
                occ(2, "This is test"),
                occ(3, "This is a testimony"),
                occ(4, "These are tests"),
                occ(5, "This is a a test"),
            ],
            Algorithm::Dekker,
            0,
        )
        .unwrap();
        let response = AlignmentResponse {
            witnesses: (1..=5).map(|i| i.to_string()).collect(),
            table: vec![
                cells(&[&["This ", "is "], &["This ", "is "], &["This ", "is "], &["These ", "are "], &["This ", "is "]]),
                cells(&[&["a "], &[], &["a "], &[], &["a "]]),
                cells(&[&[], &[], &["testimony"], &[], &["a "]]),
                cells(&[&["test"], &["test"], &[], &["tests"], &["test"]]),
            ],
        };
        let plan = build_apparatus(&request, &response).unwrap();

        assert_eq!(plan.units.len(), 4);
        // Every occurrence has a distinct profile
        assert_eq!(plan.stripes.len(), 5);
        assert_eq!(plan.reading_text(4, 0), Some("These are"));
        assert_eq!(plan.reading_text(3, 3), Some(""));
        assert_eq!(plan.reading_text(5, 2), Some("a"));
        // Unit 3: "test" seen first gets 1, empty gets 0, "tests" gets 2
        let labels: Vec<i64> = plan.units[3].readings.iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![1, 0, 2]);
    }

    #[test]
    fn test_row_width_mismatch() {
        let (request, mut response) = two_witness_case();
        response.table[1] = cells(&[&["a "]]);
        let err = build_apparatus(&request, &response).unwrap_err();
        assert!(matches!(err, ApparatusError::RowWidth { row: 1, expected: 2, found: 1 }));
    }

    #[test]
    fn test_unknown_and_missing_witnesses() {
        let (request, mut response) = two_witness_case();
        response.witnesses[1] = "99".into();
        assert!(matches!(
            build_apparatus(&request, &response),
            Err(ApparatusError::UnknownWitness(ref w)) if w == "99"
        ));

        let (request, mut response) = two_witness_case();
        response.witnesses.pop();
        for row in &mut response.table {
            row.pop();
        }
        assert!(matches!(
            build_apparatus(&request, &response),
            Err(ApparatusError::MissingWitness(2))
        ));
    }
}
