//! Shared helpers for stripey-cx integration tests
//!
//! Temporary databases, TEI fixture builders and an in-process alignment
//! oracle that needs neither Java nor a network.

#![allow(dead_code)]

use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stripey_common::db::init_database;
use stripey_cx::oracle::{AlignmentOracle, AlignmentRequest, AlignmentResponse, OracleError};
use tempfile::TempDir;

/// Fresh database in a temp dir; keep the TempDir alive for the test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("stripey.db")).await.unwrap();
    (temp_dir, pool)
}

// ============================================================================
// TEI fixtures
// ============================================================================

/// A TEI document for book `book_num` with the given hands and chapter bodies
pub fn tei(book: &str, book_num: u32, ga: &str, hands: &[&str], chapters: &[(u32, &str)]) -> String {
    let witnesses: String = hands
        .iter()
        .map(|h| format!(r#"<witness xml:id="{}"/>"#, h))
        .collect();
    let divs: String = chapters
        .iter()
        .map(|(n, body)| format!(r#"<div type="chapter" n="B{:02}K{}">{}</div>"#, book_num, n, body))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader>
    <fileDesc>
      <titleStmt>
        <title type="work" n="B{num:02}">{book}</title>
        <title type="short">{book}</title>
      </titleStmt>
      <sourceDesc>
        <msDesc>
          <msIdentifier>
            <msName>Codex {ga}</msName>
            <altIdentifier type="GA"><idno>{ga}</idno></altIdentifier>
          </msIdentifier>
        </msDesc>
        <listWit>{witnesses}</listWit>
      </sourceDesc>
    </fileDesc>
  </teiHeader>
  <text><body><div type="book" n="B{num:02}">{divs}</div></body></text>
</TEI>"#,
        num = book_num,
        book = book,
        ga = ga,
        witnesses = witnesses,
        divs = divs,
    )
}

/// `<ab>` with one `<w>` per word of `text`
pub fn plain_verse(chapter: u32, verse: u32, text: &str) -> String {
    let words: Vec<String> = text.split_whitespace().map(|w| format!("<w>{}</w>", w)).collect();
    format!(r#"<ab n="B04K{}V{}">{}</ab>"#, chapter, verse, words.join(" "))
}

pub fn write_witness(dir: &Path, ms_ref: &str, xml: &str) -> PathBuf {
    let path = dir.join(format!("{}.xml", ms_ref));
    std::fs::write(&path, xml).unwrap();
    path
}

// ============================================================================
// Mock oracle
// ============================================================================

/// Aligns witnesses token by token, position against position
///
/// Tokens carry a trailing space except the last, like CollateX output.
pub fn positional_alignment(request: &AlignmentRequest) -> AlignmentResponse {
    let tokens: Vec<Vec<String>> = request
        .witnesses
        .iter()
        .map(|w| {
            let words: Vec<&str> = w.content.split_whitespace().collect();
            words
                .iter()
                .enumerate()
                .map(|(i, word)| {
                    if i + 1 < words.len() {
                        format!("{} ", word)
                    } else {
                        word.to_string()
                    }
                })
                .collect()
        })
        .collect();
    let rows = tokens.iter().map(Vec::len).max().unwrap_or(0);

    let table: Vec<Vec<Vec<String>>> = (0..rows)
        .map(|row| {
            tokens
                .iter()
                .map(|t| t.get(row).cloned().into_iter().collect::<Vec<_>>())
                .collect::<Vec<_>>()
        })
        .collect();

    AlignmentResponse {
        witnesses: request.witnesses.iter().map(|w| w.id.clone()).collect(),
        table,
    }
}

/// In-process oracle with lifecycle counters and scripted failures
#[derive(Default)]
pub struct MockOracle {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub restarts: AtomicUsize,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Zero-based indices of align calls that fail
    fail_calls: Vec<usize>,
    always_fail: bool,
    fail_start: bool,
    delay: Duration,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_calls(calls: &[usize]) -> Self {
        Self {
            fail_calls: calls.to_vec(),
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn should_fail(&self, call: usize) -> bool {
        self.always_fail || self.fail_calls.contains(&call)
    }
}

#[async_trait::async_trait]
impl AlignmentOracle for MockOracle {
    async fn start(&self) -> Result<(), OracleError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(OracleError::SmokeTestFailed("mock".into()));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), OracleError> {
        Ok(())
    }

    async fn restart(&self) -> Result<(), OracleError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), OracleError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn align(&self, request: &AlignmentRequest) -> Result<AlignmentResponse, OracleError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = if self.should_fail(call) {
            Err(OracleError::NetworkError("connection refused".into()))
        } else {
            Ok(positional_alignment(request))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
