//! Collation orchestrator tests with an in-process oracle

mod helpers;

use helpers::{create_test_db, plain_verse, tei, write_witness, MockOracle};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use stripey_cx::db::{find_uncollated, ChapterScope};
use stripey_cx::oracle::Algorithm;
use stripey_cx::services::{load_folder, CollateSettings, Collator};
use stripey_cx::CollateError;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Two witnesses, four verses with text plus one verse omitted everywhere
async fn loaded_db() -> (TempDir, TempDir, SqlitePool) {
    let (db_dir, pool) = create_test_db().await;
    let dir = TempDir::new().unwrap();

    let a1 = format!(
        "{}{}{}",
        plain_verse(1, 1, "This is a test"),
        plain_verse(1, 2, "In the beginning"),
        r#"<ab n="B04K1V3"><w>om</w></ab>"#
    );
    let a2 = format!("{}{}", plain_verse(2, 1, "And the word"), plain_verse(2, 2, "was with God"));
    write_witness(
        dir.path(),
        "01",
        &tei("John", 4, "01", &[], &[(1, a1.as_str()), (2, a2.as_str())]),
    );

    let b1 = format!("{}{}", plain_verse(1, 1, "This is test"), plain_verse(1, 2, "In the beginning"));
    let b2 = format!("{}{}", plain_verse(2, 1, "And a word"), plain_verse(2, 2, "was with God"));
    write_witness(
        dir.path(),
        "02",
        &tei("John", 4, "02", &[], &[(1, b1.as_str()), (2, b2.as_str())]),
    );

    load_folder(&pool, dir.path()).await.unwrap();
    (db_dir, dir, pool)
}

fn settings(workers: usize, max_consecutive_errors: u32) -> CollateSettings {
    CollateSettings {
        workers,
        fuzzy_edit_distance: 0,
        max_consecutive_errors,
        db_max_lock_wait_ms: 1000,
    }
}

async fn failures(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM collation_failures")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_collates_every_verse_and_stops_oracle() {
    let (_db, _src, pool) = loaded_db().await;
    let oracle = Arc::new(MockOracle::new());
    let collator = Collator::new(pool.clone(), oracle.clone(), settings(3, 20), CancellationToken::new());

    let summaries = collator.run(&[Algorithm::Dekker], None).await.unwrap();
    assert_eq!(summaries.len(), 1);
    let (algorithm, summary) = &summaries[0];
    assert_eq!(*algorithm, Algorithm::Dekker);
    assert_eq!(summary.collated, 4);
    assert_eq!(summary.empty, 1);
    assert_eq!(summary.failed, 0);

    assert_eq!(MockOracle::count(&oracle.starts), 1);
    assert_eq!(MockOracle::count(&oracle.stops), 1);
    assert_eq!(MockOracle::count(&oracle.calls), 4);
    assert!(find_uncollated(&pool, Algorithm::Dekker).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_skips_collated_verses() {
    let (_db, _src, pool) = loaded_db().await;
    let first = Collator::new(pool.clone(), Arc::new(MockOracle::new()), settings(2, 20), CancellationToken::new());
    first.run(&[Algorithm::Dekker], None).await.unwrap();

    let oracle = Arc::new(MockOracle::new());
    let second = Collator::new(pool.clone(), oracle.clone(), settings(2, 20), CancellationToken::new());
    let summaries = second.run(&[Algorithm::Dekker], None).await.unwrap();

    let summary = &summaries[0].1;
    assert_eq!(summary.collated, 0);
    assert_eq!(summary.skipped, 4);
    assert_eq!(MockOracle::count(&oracle.calls), 0);
}

#[tokio::test]
async fn test_chapter_scope() {
    let (_db, _src, pool) = loaded_db().await;
    let collator = Collator::new(pool.clone(), Arc::new(MockOracle::new()), settings(2, 20), CancellationToken::new());

    let scope: ChapterScope = "4:2".parse().unwrap();
    let summaries = collator.run(&[Algorithm::Dekker], Some(scope)).await.unwrap();
    assert_eq!(summaries[0].1.collated, 2);

    let left: Vec<(i64, i64)> = find_uncollated(&pool, Algorithm::Dekker)
        .await
        .unwrap()
        .iter()
        .map(|v| (v.chapter, v.verse))
        .collect();
    assert_eq!(left, vec![(1, 1), (1, 2)]);
}

#[tokio::test]
async fn test_every_algorithm_in_one_oracle_session() {
    let (_db, _src, pool) = loaded_db().await;
    let oracle = Arc::new(MockOracle::new());
    let collator = Collator::new(pool.clone(), oracle.clone(), settings(2, 20), CancellationToken::new());

    let summaries = collator.run(&Algorithm::ALL, None).await.unwrap();
    assert_eq!(summaries.len(), 3);
    assert!(summaries.iter().all(|(_, s)| s.collated == 4));
    assert_eq!(MockOracle::count(&oracle.starts), 1);
    assert_eq!(MockOracle::count(&oracle.stops), 1);

    for algorithm in Algorithm::ALL {
        assert!(find_uncollated(&pool, algorithm).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_restart_after_too_many_consecutive_failures() {
    let (_db, _src, pool) = loaded_db().await;
    let oracle = Arc::new(MockOracle::always_failing());
    let collator = Collator::new(pool.clone(), oracle.clone(), settings(1, 2), CancellationToken::new());

    let summaries = collator.run(&[Algorithm::Dekker], None).await.unwrap();
    let summary = &summaries[0].1;
    assert_eq!(summary.failed, 4);
    assert_eq!(summary.collated, 0);

    // The third failure crosses the threshold; the counter then starts over
    assert_eq!(MockOracle::count(&oracle.restarts), 1);
    assert_eq!(collator.restarts(), 1);
    assert_eq!(failures(&pool).await, 4);

    // Failed verses stay eligible for the next run
    assert_eq!(find_uncollated(&pool, Algorithm::Dekker).await.unwrap().len(), 4);
    assert_eq!(MockOracle::count(&oracle.stops), 1);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let (_db, _src, pool) = loaded_db().await;
    // Three failures in total, but never more than two in a row
    let oracle = Arc::new(MockOracle::failing_calls(&[0, 1, 3]));
    let collator = Collator::new(pool.clone(), oracle.clone(), settings(1, 2), CancellationToken::new());

    let summaries = collator.run(&[Algorithm::Dekker], None).await.unwrap();
    let summary = &summaries[0].1;
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.collated, 1);
    assert_eq!(MockOracle::count(&oracle.restarts), 0);

    // A later run picks up the failed verses
    let retry = Collator::new(pool.clone(), Arc::new(MockOracle::new()), settings(1, 2), CancellationToken::new());
    let summaries = retry.run(&[Algorithm::Dekker], None).await.unwrap();
    assert_eq!(summaries[0].1.collated, 3);
    assert_eq!(summaries[0].1.skipped, 1);
    assert!(find_uncollated(&pool, Algorithm::Dekker).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_start_still_stops_oracle() {
    let (_db, _src, pool) = loaded_db().await;
    let oracle = Arc::new(MockOracle::failing_start());
    let collator = Collator::new(pool.clone(), oracle.clone(), settings(2, 20), CancellationToken::new());

    let result = collator.run(&[Algorithm::Dekker], None).await;
    assert!(matches!(result, Err(CollateError::Oracle(_))));
    assert_eq!(MockOracle::count(&oracle.calls), 0);
    assert_eq!(MockOracle::count(&oracle.stops), 1);
}

#[tokio::test]
async fn test_cancel_stops_feeding_verses() {
    let (_db, _src, pool) = loaded_db().await;
    let oracle = Arc::new(MockOracle::with_delay(Duration::from_millis(200)));
    let token = CancellationToken::new();
    let collator = Collator::new(pool.clone(), oracle.clone(), settings(1, 20), token.clone());

    let (result, _) = tokio::join!(collator.run(&[Algorithm::Dekker], None), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    assert!(matches!(result, Err(CollateError::Cancelled)));
    // The in-flight verse finishes and is saved; nothing else is started
    assert_eq!(MockOracle::count(&oracle.calls), 1);
    assert_eq!(find_uncollated(&pool, Algorithm::Dekker).await.unwrap().len(), 3);
    assert_eq!(MockOracle::count(&oracle.stops), 1);
}

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let (_db, _src, pool) = loaded_db().await;
    let oracle = Arc::new(MockOracle::with_delay(Duration::from_millis(50)));
    let collator = Collator::new(pool.clone(), oracle.clone(), settings(2, 20), CancellationToken::new());

    collator.run(&[Algorithm::Dekker], None).await.unwrap();
    let max = MockOracle::count(&oracle.max_in_flight);
    assert!(max >= 1 && max <= 2, "max in flight was {}", max);
}
