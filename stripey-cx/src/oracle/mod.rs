//! Alignment oracle interface
//!
//! The oracle is an external CollateX HTTP service that aligns witness texts
//! into a table of variant units. This module defines the wire types, the
//! lifecycle trait the orchestrator drives, and the error type shared by the
//! HTTP client and the process supervisor.

pub mod client;
pub mod supervisor;

pub use client::HttpOracleClient;
pub use supervisor::{CollatexProcess, OracleProcess, OracleSupervisor};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Oracle errors
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Oracle returned HTTP {0}: {1}")]
    ApiError(u16, String),

    #[error("Oracle call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed oracle response: {0}")]
    ParseError(String),

    #[error("Oracle is unavailable: {0}")]
    Unavailable(String),

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("Failed to launch oracle process: {0}")]
    SpawnFailed(String),

    #[error("Oracle process exited during start-up")]
    ExitedEarly,

    #[error("Oracle failed its smoke test: {0}")]
    SmokeTestFailed(String),
}

// ============================================================================
// Algorithms
// ============================================================================

/// Alignment strategies offered by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Dekker,
    NeedlemanWunsch,
    Medite,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Dekker, Algorithm::NeedlemanWunsch, Algorithm::Medite];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Dekker => "dekker",
            Algorithm::NeedlemanWunsch => "needleman-wunsch",
            Algorithm::Medite => "medite",
        }
    }

    /// Parse a command-line selection; "all" expands to every algorithm
    pub fn parse_selection(value: &str) -> Result<Vec<Algorithm>, OracleError> {
        if value == "all" {
            Ok(Self::ALL.to_vec())
        } else {
            Ok(vec![value.parse()?])
        }
    }
}

impl FromStr for Algorithm {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dekker" => Ok(Algorithm::Dekker),
            "needleman-wunsch" => Ok(Algorithm::NeedlemanWunsch),
            "medite" => Ok(Algorithm::Medite),
            other => Err(OracleError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// One witness text submitted for alignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessContent {
    pub id: String,
    pub content: String,
}

/// Fuzzy token matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenComparator {
    #[serde(rename = "type")]
    pub kind: String,
    pub distance: u32,
}

/// Body of a collation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRequest {
    pub witnesses: Vec<WitnessContent>,
    pub algorithm: String,
    #[serde(rename = "tokenComparator", skip_serializing_if = "Option::is_none", default)]
    pub token_comparator: Option<TokenComparator>,
}

impl AlignmentRequest {
    /// Build a request; a fuzzy distance of 0 means exact token matching
    pub fn new(witnesses: Vec<WitnessContent>, algorithm: Algorithm, fuzzy_edit_distance: u32) -> Self {
        let token_comparator = (fuzzy_edit_distance > 0).then(|| TokenComparator {
            kind: "levenshtein".to_string(),
            distance: fuzzy_edit_distance,
        });
        Self {
            witnesses,
            algorithm: algorithm.as_str().to_string(),
            token_comparator,
        }
    }
}

/// Alignment table
///
/// `table[row][column]` holds the tokens of witness `witnesses[column]` at
/// variant unit `row`; an empty cell means the witness has nothing there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentResponse {
    pub witnesses: Vec<String>,
    pub table: Vec<Vec<Vec<String>>>,
}

// ============================================================================
// Traits
// ============================================================================

/// Sends one collation request to a running oracle
#[async_trait::async_trait]
pub trait OracleTransport: Send + Sync {
    async fn collate(&self, request: &AlignmentRequest) -> Result<AlignmentResponse, OracleError>;
}

/// A supervised alignment oracle
#[async_trait::async_trait]
pub trait AlignmentOracle: Send + Sync {
    /// Launch the oracle and smoke-test it before accepting work
    async fn start(&self) -> Result<(), OracleError>;

    /// Run the smoke-test query
    async fn health_check(&self) -> Result<(), OracleError>;

    /// Wait for in-flight calls to drain, then relaunch
    async fn restart(&self) -> Result<(), OracleError>;

    /// Terminate the oracle
    async fn stop(&self) -> Result<(), OracleError>;

    /// Align witness texts, waiting while the oracle is restarting
    async fn align(&self, request: &AlignmentRequest) -> Result<AlignmentResponse, OracleError>;
}

/// Witness texts used for the start-up smoke test
pub fn smoke_test_request() -> AlignmentRequest {
    AlignmentRequest::new(
        vec![
            WitnessContent {
                id: "1".to_string(),
                content: "This is a test".to_string(),
            },
            WitnessContent {
                id: "2".to_string(),
                content: "This is test".to_string(),
            },
        ],
        Algorithm::Dekker,
        0,
    )
}
