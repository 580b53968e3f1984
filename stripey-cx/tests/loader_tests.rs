//! Witness loading against a real database
//!
//! Covers folder scanning, per-hand text storage, hand fallback across
//! correctors, and per-file failure isolation.

mod helpers;

use helpers::{create_test_db, plain_verse, tei, write_witness};
use sqlx::SqlitePool;
use stripey_cx::services::{load_folder, load_witness, scan_transcriptions, LoadError, LoadOutcome};
use tempfile::TempDir;

const CORRECTED_VERSE: &str = r#"<ab n="B04K1V2"><w>a</w> <app>
    <rdg type="orig" hand="firsthand"><w>b</w></rdg>
    <rdg type="corr" hand="corrector1"><w>c</w></rdg>
  </app> <app>
    <rdg type="orig" hand="firsthand"><w>d</w></rdg>
    <rdg type="corr" hand="corrector2"><w>e</w></rdg>
  </app></ab>"#;

fn corrected_witness() -> String {
    let chapter = format!("{}{}", plain_verse(1, 1, "Εν αρχη ην ο λογος"), CORRECTED_VERSE);
    tei(
        "John",
        4,
        "01",
        &["firsthand", "corrector1", "corrector2"],
        &[(1, chapter.as_str())],
    )
}

fn plain_witness() -> String {
    let chapter = format!("{}{}", plain_verse(1, 1, "Εν αρχη ην"), plain_verse(1, 2, "a b d"));
    tei("John", 4, "02", &[], &[(1, chapter.as_str())])
}

/// (hand, text) pairs stored for one witness and verse, sorted by hand
async fn hand_texts(pool: &SqlitePool, ms_ref: &str, verse: i64) -> Vec<(String, String)> {
    sqlx::query_as(
        r#"
        SELECT h.name, mv.text
        FROM ms_verses mv
        JOIN hands h ON h.id = mv.hand_id
        JOIN witnesses w ON w.id = h.witness_id
        JOIN verses v ON v.id = mv.verse_id
        WHERE w.ms_ref = ? AND v.num = ?
        ORDER BY h.name
        "#,
    )
    .bind(ms_ref)
    .bind(verse)
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn witness_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM witnesses")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[test]
fn test_scan_keeps_only_xml_files() {
    let dir = TempDir::new().unwrap();
    write_witness(dir.path(), "02", &plain_witness());
    write_witness(dir.path(), "01", &corrected_witness());
    std::fs::write(dir.path().join("notes.txt"), "not a witness").unwrap();
    std::fs::create_dir(dir.path().join("sub.xml")).unwrap();

    let files = scan_transcriptions(dir.path()).unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["01.xml", "02.xml"]);
}

#[test]
fn test_scan_missing_folder() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope");
    assert!(matches!(scan_transcriptions(&missing), Err(LoadError::PathNotFound(_))));

    let file = write_witness(dir.path(), "01", &plain_witness());
    assert!(matches!(scan_transcriptions(&file), Err(LoadError::NotADirectory(_))));
}

#[tokio::test]
async fn test_load_stores_every_hand() {
    let (_db_dir, pool) = create_test_db().await;
    let dir = TempDir::new().unwrap();
    let path = write_witness(dir.path(), "01", &corrected_witness());

    assert_eq!(load_witness(&pool, &path).await.unwrap(), LoadOutcome::Loaded);

    let verse1 = hand_texts(&pool, "01", 1).await;
    assert_eq!(verse1, vec![("firsthand".to_string(), "εν αρχη ην ο λογος".to_string())]);

    let verse2 = hand_texts(&pool, "01", 2).await;
    assert_eq!(
        verse2,
        vec![
            ("corrector1".to_string(), "a c d".to_string()),
            ("corrector2".to_string(), "a c e".to_string()),
            ("firsthand".to_string(), "a b d".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_later_corrector_inherits_earlier_correction() {
    let (_db_dir, pool) = create_test_db().await;
    let dir = TempDir::new().unwrap();
    let path = write_witness(dir.path(), "01", &corrected_witness());
    load_witness(&pool, &path).await.unwrap();

    let texts = hand_texts(&pool, "01", 2).await;
    let corrector2 = texts.iter().find(|(h, _)| h == "corrector2").unwrap();
    // corrector1's "c", not the first hand's "b"
    assert_eq!(corrector2.1, "a c e");
}

#[tokio::test]
async fn test_load_records_witness_metadata() {
    let (_db_dir, pool) = create_test_db().await;
    let dir = TempDir::new().unwrap();
    let path = write_witness(dir.path(), "01", &corrected_witness());
    load_witness(&pool, &path).await.unwrap();

    let (xml_filename, status, ms_name, ga): (String, String, String, String) =
        sqlx::query_as("SELECT xml_filename, status, ms_name, ga FROM witnesses WHERE ms_ref = '01'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(xml_filename, "01.xml");
    assert_eq!(status, stripey_common::db::Witness::STATUS_LOADED);
    assert_eq!(ms_name, "Codex 01");
    assert_eq!(ga, "01");

    let (book, num): (String, i64) = sqlx::query_as("SELECT name, num FROM books")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(book, "John");
    assert_eq!(num, 4);
}

#[tokio::test]
async fn test_folder_load_isolates_failures() {
    let (_db_dir, pool) = create_test_db().await;
    let dir = TempDir::new().unwrap();
    write_witness(dir.path(), "01", &corrected_witness());
    write_witness(dir.path(), "02", &plain_witness());
    write_witness(dir.path(), "03", "<TEI><text><div type=\"chapter\" n=\"1\">");
    write_witness(
        dir.path(),
        "04",
        r#"<TEI><text><div type="chapter" n="1"><ab n="1"><w>και</w></ab></div></text></TEI>"#,
    );

    let summary = load_folder(&pool, dir.path()).await.unwrap();
    assert_eq!(summary.loaded.len(), 2);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.failed.len(), 2);
    assert!(summary.failed[0].0.ends_with("03.xml"));
    assert!(summary.failed[1].0.ends_with("04.xml"));
    assert!(summary.failed[1].1.contains("no book title"));

    assert_eq!(witness_count(&pool).await, 2);
}

#[tokio::test]
async fn test_reload_skips_loaded_witnesses() {
    let (_db_dir, pool) = create_test_db().await;
    let dir = TempDir::new().unwrap();
    write_witness(dir.path(), "01", &corrected_witness());
    write_witness(dir.path(), "02", &plain_witness());

    load_folder(&pool, dir.path()).await.unwrap();
    let rows_before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ms_verses")
        .fetch_one(&pool)
        .await
        .unwrap();

    let summary = load_folder(&pool, dir.path()).await.unwrap();
    assert!(summary.loaded.is_empty());
    assert_eq!(summary.skipped.len(), 2);

    let rows_after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ms_verses")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows_before, rows_after);
}

#[tokio::test]
async fn test_shared_catalogue_across_witnesses() {
    let (_db_dir, pool) = create_test_db().await;
    let dir = TempDir::new().unwrap();
    write_witness(dir.path(), "01", &corrected_witness());
    write_witness(dir.path(), "02", &plain_witness());
    load_folder(&pool, dir.path()).await.unwrap();

    let verses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM verses")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(verses, 2);

    let texts = hand_texts(&pool, "02", 2).await;
    assert_eq!(texts, vec![("firsthand".to_string(), "a b d".to_string())]);
}
