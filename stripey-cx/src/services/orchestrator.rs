//! Collation orchestrator
//!
//! Walks books → chapters → verses in catalogue order and collates every
//! verse that has no apparatus yet for the algorithm. Verses are fed to a
//! bounded pool of workers; each worker queries the oracle and writes the
//! verse's apparatus in one transaction.
//!
//! The orchestrator owns the oracle lifecycle: it starts (and smoke-tests)
//! the oracle before any work, restarts it after too many consecutive
//! failures, and stops it when the run ends, whether or not the run
//! succeeded.

use crate::apparatus::{collate_verse, ApparatusError};
use crate::db::apparatus::{get_or_create_algorithm, is_collated, record_failure, save_apparatus, ChapterScope};
use crate::db::records::{list_books, list_chapters, list_verses, verse_occurrences};
use crate::error::{CollateError, CollateResult};
use crate::oracle::{AlignmentOracle, Algorithm};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use stripey_common::config::{CollateConfig, OracleConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Run-time knobs for a collation run
#[derive(Debug, Clone)]
pub struct CollateSettings {
    pub workers: usize,
    pub fuzzy_edit_distance: u32,
    pub max_consecutive_errors: u32,
    pub db_max_lock_wait_ms: u64,
}

impl CollateSettings {
    pub fn from_config(oracle: &OracleConfig, collate: &CollateConfig) -> Self {
        Self {
            workers: collate.workers,
            fuzzy_edit_distance: oracle.fuzzy_edit_distance,
            max_consecutive_errors: oracle.max_consecutive_errors,
            db_max_lock_wait_ms: collate.db_max_lock_wait_ms,
        }
    }
}

impl Default for CollateSettings {
    fn default() -> Self {
        Self::from_config(&OracleConfig::default(), &CollateConfig::default())
    }
}

/// Per-algorithm totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollateSummary {
    /// Verses whose apparatus was written by this run
    pub collated: usize,
    /// Verses already collated before this run
    pub skipped: usize,
    /// Verses with no text in any witness
    pub empty: usize,
    /// Verses that failed and remain eligible for a later run
    pub failed: usize,
    /// Verses not started because the run was cancelled
    pub not_started: usize,
}

/// A verse waiting to be collated
#[derive(Debug, Clone)]
struct VerseWork {
    verse_id: i64,
    reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerseOutcome {
    Collated,
    AlreadyCollated,
    Empty,
    Failed,
    NotStarted,
}

pub struct Collator {
    pool: SqlitePool,
    oracle: Arc<dyn AlignmentOracle>,
    settings: CollateSettings,
    cancel_token: CancellationToken,
    consecutive_errors: AtomicU32,
    restarts: AtomicUsize,
}

impl Collator {
    pub fn new(
        pool: SqlitePool,
        oracle: Arc<dyn AlignmentOracle>,
        settings: CollateSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            pool,
            oracle,
            settings,
            cancel_token,
            consecutive_errors: AtomicU32::new(0),
            restarts: AtomicUsize::new(0),
        }
    }

    /// Oracle restarts triggered by consecutive failures so far
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Start the oracle, collate every algorithm in turn, stop the oracle
    pub async fn run(
        &self,
        algorithms: &[Algorithm],
        scope: Option<ChapterScope>,
    ) -> CollateResult<Vec<(Algorithm, CollateSummary)>> {
        let result = match self.oracle.start().await {
            Ok(()) => self.collate_algorithms(algorithms, scope).await,
            Err(e) => {
                error!(error = %e, "Failed to start the oracle");
                Err(e.into())
            }
        };

        if let Err(e) = self.oracle.stop().await {
            warn!(error = %e, "Failed to stop the oracle cleanly");
        }
        result
    }

    async fn collate_algorithms(
        &self,
        algorithms: &[Algorithm],
        scope: Option<ChapterScope>,
    ) -> CollateResult<Vec<(Algorithm, CollateSummary)>> {
        let mut summaries = Vec::with_capacity(algorithms.len());
        for &algorithm in algorithms {
            if self.cancel_token.is_cancelled() {
                info!(algorithm = %algorithm, "Cancelled before collating");
                break;
            }
            let summary = self.collate_algorithm(algorithm, scope).await?;
            summaries.push((algorithm, summary));
        }
        Ok(summaries)
    }

    /// Collate every uncollated verse in scope with one algorithm
    ///
    /// The oracle must already be started.
    pub async fn collate_algorithm(
        &self,
        algorithm: Algorithm,
        scope: Option<ChapterScope>,
    ) -> CollateResult<CollateSummary> {
        let algorithm_id = get_or_create_algorithm(&self.pool, algorithm).await?;
        let mut summary = CollateSummary::default();

        let pending = self.pending_verses(algorithm_id, scope, &mut summary).await?;
        info!(
            algorithm = %algorithm,
            pending = pending.len(),
            already_collated = summary.skipped,
            workers = self.settings.workers,
            "Starting collation"
        );

        let total = pending.len();
        let done = AtomicUsize::new(0);

        let outcomes: Vec<VerseOutcome> = stream::iter(pending)
            .map(|work| {
                let done = &done;
                async move {
                    let outcome = self.collate_one(&work, algorithm, algorithm_id).await;
                    let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if current % 100 == 0 || current == total {
                        info!(algorithm = %algorithm, progress = format!("{}/{}", current, total), "Collation progress");
                    }
                    outcome
                }
            })
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                VerseOutcome::Collated => summary.collated += 1,
                VerseOutcome::AlreadyCollated => summary.skipped += 1,
                VerseOutcome::Empty => summary.empty += 1,
                VerseOutcome::Failed => summary.failed += 1,
                VerseOutcome::NotStarted => summary.not_started += 1,
            }
        }

        info!(
            algorithm = %algorithm,
            collated = summary.collated,
            failed = summary.failed,
            skipped = summary.skipped,
            empty = summary.empty,
            "Collation finished"
        );

        if self.cancel_token.is_cancelled() {
            info!(not_started = summary.not_started, "Collation cancelled");
            return Err(CollateError::Cancelled);
        }
        Ok(summary)
    }

    /// Uncollated verses in scope, in catalogue order
    async fn pending_verses(
        &self,
        algorithm_id: i64,
        scope: Option<ChapterScope>,
        summary: &mut CollateSummary,
    ) -> CollateResult<Vec<VerseWork>> {
        let mut pending = Vec::new();

        for book in list_books(&self.pool).await? {
            if scope.map_or(false, |s| s.book_num != book.num) {
                continue;
            }
            let before = pending.len();

            for chapter in list_chapters(&self.pool, book.id).await? {
                if scope.map_or(false, |s| s.chapter != chapter.num) {
                    continue;
                }

                for verse in list_verses(&self.pool, chapter.id).await? {
                    if is_collated(&self.pool, verse.id, algorithm_id).await? {
                        summary.skipped += 1;
                        continue;
                    }
                    pending.push(VerseWork {
                        verse_id: verse.id,
                        reference: format!("{} {}:{}", book.name, chapter.num, verse.num),
                    });
                }
            }

            debug!(book = %book.name, pending = pending.len() - before, "Queued book");
        }

        Ok(pending)
    }

    async fn collate_one(&self, work: &VerseWork, algorithm: Algorithm, algorithm_id: i64) -> VerseOutcome {
        if self.cancel_token.is_cancelled() {
            return VerseOutcome::NotStarted;
        }

        debug!(verse = %work.reference, algorithm = %algorithm, "Collating verse");

        let occurrences = match verse_occurrences(&self.pool, work.verse_id).await {
            Ok(occurrences) => occurrences,
            Err(e) => {
                error!(verse = %work.reference, error = %e, "Failed to read verse texts");
                return VerseOutcome::Failed;
            }
        };

        let plan = match collate_verse(
            self.oracle.as_ref(),
            &occurrences,
            algorithm,
            self.settings.fuzzy_edit_distance,
        )
        .await
        {
            Ok(Some(plan)) => {
                self.consecutive_errors.store(0, Ordering::SeqCst);
                plan
            }
            Ok(None) => return VerseOutcome::Empty,
            Err(e) => {
                error!(verse = %work.reference, algorithm = %algorithm, error = %e, "Collation failed");
                self.note_failure(work, algorithm_id, &e.to_string()).await;
                if matches!(e, ApparatusError::Oracle(_)) {
                    self.note_oracle_failure().await;
                }
                return VerseOutcome::Failed;
            }
        };

        match save_apparatus(
            &self.pool,
            work.verse_id,
            algorithm_id,
            &plan,
            self.settings.db_max_lock_wait_ms,
        )
        .await
        {
            Ok(true) => {
                debug!(verse = %work.reference, units = plan.units.len(), stripes = plan.stripes.len(), "Saved apparatus");
                VerseOutcome::Collated
            }
            Ok(false) => VerseOutcome::AlreadyCollated,
            Err(e) => {
                error!(verse = %work.reference, error = %e, "Failed to save apparatus");
                self.note_failure(work, algorithm_id, &e.to_string()).await;
                VerseOutcome::Failed
            }
        }
    }

    async fn note_failure(&self, work: &VerseWork, algorithm_id: i64, message: &str) {
        if let Err(e) = record_failure(&self.pool, work.verse_id, algorithm_id, message).await {
            warn!(verse = %work.reference, error = %e, "Failed to record collation failure");
        }
    }

    /// Count a failed oracle call; past the threshold, restart the oracle
    async fn note_oracle_failure(&self) {
        let count = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count <= self.settings.max_consecutive_errors {
            return;
        }
        // Only one worker performs the restart
        if self
            .consecutive_errors
            .compare_exchange(count, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        warn!(consecutive_errors = count, "Too many consecutive oracle errors, restarting CollateX");
        match self.oracle.restart().await {
            Ok(()) => {
                self.restarts.fetch_add(1, Ordering::Relaxed);
                info!("CollateX restarted");
            }
            Err(e) => {
                error!(error = %e, "CollateX restart failed, cancelling the run");
                self.cancel_token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let mut oracle = OracleConfig::default();
        oracle.max_consecutive_errors = 4;
        oracle.fuzzy_edit_distance = 0;
        let collate = CollateConfig {
            workers: 8,
            db_max_lock_wait_ms: 100,
        };

        let settings = CollateSettings::from_config(&oracle, &collate);
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.max_consecutive_errors, 4);
        assert_eq!(settings.fuzzy_edit_distance, 0);
        assert_eq!(settings.db_max_lock_wait_ms, 100);
    }

    #[test]
    fn test_default_settings() {
        let settings = CollateSettings::default();
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.max_consecutive_errors, 20);
    }
}
