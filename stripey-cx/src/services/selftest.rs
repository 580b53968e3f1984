//! Oracle self-test
//!
//! Aligns a fixed five-witness sample with every algorithm and compares the
//! tables against known-good responses.

use crate::oracle::{AlignmentOracle, AlignmentRequest, AlignmentResponse, Algorithm, OracleError, WitnessContent};
use thiserror::Error;
use tracing::info;

const SAMPLE: [(&str, &str); 5] = [
    ("1", "This is a test"),
    ("2", "This is test"),
    ("3", "This is a testimony"),
    ("4", "These are tests"),
    ("5", "This is a a test"),
];

#[derive(Debug, Error)]
pub enum SelftestError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("{algorithm} returned an unexpected alignment: {actual:?}")]
    Mismatch {
        algorithm: Algorithm,
        actual: AlignmentResponse,
    },
}

pub fn sample_request(algorithm: Algorithm, fuzzy_edit_distance: u32) -> AlignmentRequest {
    let witnesses = SAMPLE
        .iter()
        .map(|(id, content)| WitnessContent {
            id: id.to_string(),
            content: content.to_string(),
        })
        .collect();
    AlignmentRequest::new(witnesses, algorithm, fuzzy_edit_distance)
}

fn cells(row: &[&[&str]]) -> Vec<Vec<String>> {
    row.iter()
        .map(|tokens| tokens.iter().map(|t| t.to_string()).collect())
        .collect()
}

/// Known-good alignment of the sample
pub fn expected_response(algorithm: Algorithm) -> AlignmentResponse {
    let table: Vec<Vec<Vec<String>>> = match algorithm {
        Algorithm::Dekker => vec![
            cells(&[&["This ", "is "], &["This ", "is "], &["This ", "is "], &["These ", "are "], &["This ", "is "]]),
            cells(&[&["a "], &[], &["a "], &[], &["a "]]),
            cells(&[&[], &[], &["testimony"], &[], &["a "]]),
            cells(&[&["test"], &["test"], &[], &["tests"], &["test"]]),
        ],
        Algorithm::NeedlemanWunsch => vec![
            cells(&[&[], &[], &[], &[], &["This "]]),
            cells(&[&["This "], &[], &["This "], &[], &["is "]]),
            cells(&[&["is ", "a "], &["This ", "is "], &["is ", "a "], &["These ", "are "], &["a ", "a "]]),
            cells(&[&["test"], &["test"], &["testimony"], &["tests"], &["test"]]),
        ],
        Algorithm::Medite => vec![
            cells(&[&[], &[], &[], &[], &["This "]]),
            cells(&[&["This "], &[], &["This "], &["These "], &["is "]]),
            cells(&[&["is "], &["This "], &["is "], &["are "], &["a "]]),
            cells(&[&["a "], &["is "], &["a "], &[], &["a "]]),
            cells(&[&["test"], &["test"], &["testimony"], &["tests"], &["test"]]),
        ],
    };
    AlignmentResponse {
        witnesses: SAMPLE.iter().map(|(id, _)| id.to_string()).collect(),
        table,
    }
}

/// Check every algorithm against its known-good alignment
///
/// The oracle must already be started.
pub async fn run_selftest(oracle: &dyn AlignmentOracle, fuzzy_edit_distance: u32) -> Result<(), SelftestError> {
    for algorithm in Algorithm::ALL {
        let actual = oracle.align(&sample_request(algorithm, fuzzy_edit_distance)).await?;
        if actual != expected_response(algorithm) {
            return Err(SelftestError::Mismatch { algorithm, actual });
        }
        info!(algorithm = %algorithm, "Alignment matches");
    }
    info!("All tests passed");
    Ok(())
}
