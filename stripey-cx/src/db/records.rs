//! Record storage
//!
//! Witnesses, hands, books, chapters, verses and verse occurrences. Writers
//! take a connection so a whole witness can be loaded in one transaction;
//! readers take the pool.

use crate::apparatus::Occurrence;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use stripey_common::db::{Book, Chapter, Verse, Witness};
use stripey_common::Result;

/// Catalogue identifiers taken from a manuscript header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WitnessIdentifiers {
    pub ms_name: String,
    pub tischendorf: String,
    pub ga: String,
    pub liste_id: Option<i64>,
}

impl WitnessIdentifiers {
    /// Pick the known identifiers out of a manuscript's description map
    pub fn from_ms_desc(desc: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| desc.get(key).cloned().unwrap_or_default();
        Self {
            ms_name: get("ms_name"),
            tischendorf: get("Tischendorf"),
            ga: get("GA"),
            liste_id: desc.get("Liste").and_then(|id| id.trim().parse().ok()),
        }
    }
}

pub async fn find_witness(pool: &SqlitePool, ms_ref: &str) -> Result<Option<Witness>> {
    let witness = sqlx::query_as::<_, Witness>("SELECT * FROM witnesses WHERE ms_ref = ?")
        .bind(ms_ref)
        .fetch_optional(pool)
        .await?;
    Ok(witness)
}

pub async fn list_witnesses(pool: &SqlitePool) -> Result<Vec<Witness>> {
    let witnesses = sqlx::query_as::<_, Witness>("SELECT * FROM witnesses ORDER BY ms_ref")
        .fetch_all(pool)
        .await?;
    Ok(witnesses)
}

/// Create a witness, or refresh the metadata of an existing one
pub async fn create_witness(
    conn: &mut SqliteConnection,
    ms_ref: &str,
    xml_filename: &str,
    ids: &WitnessIdentifiers,
) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO witnesses (ms_ref, xml_filename, ms_name, tischendorf, ga, liste_id)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(ms_ref) DO UPDATE SET
            xml_filename = excluded.xml_filename,
            ms_name = excluded.ms_name,
            tischendorf = excluded.tischendorf,
            ga = excluded.ga,
            liste_id = excluded.liste_id
        "#,
    )
    .bind(ms_ref)
    .bind(xml_filename)
    .bind(&ids.ms_name)
    .bind(&ids.tischendorf)
    .bind(&ids.ga)
    .bind(ids.liste_id)
    .execute(&mut *conn)
    .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM witnesses WHERE ms_ref = ?")
        .bind(ms_ref)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn mark_witness_loaded(conn: &mut SqliteConnection, witness_id: i64) -> Result<()> {
    sqlx::query("UPDATE witnesses SET status = ? WHERE id = ?")
        .bind(Witness::STATUS_LOADED)
        .bind(witness_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get_or_create_hand(conn: &mut SqliteConnection, witness_id: i64, name: &str) -> Result<i64> {
    sqlx::query("INSERT INTO hands (witness_id, name) VALUES (?, ?) ON CONFLICT(witness_id, name) DO NOTHING")
        .bind(witness_id)
        .bind(name)
        .execute(&mut *conn)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM hands WHERE witness_id = ? AND name = ?")
        .bind(witness_id)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Books are keyed by name; the number is recorded on first creation
pub async fn get_or_create_book(conn: &mut SqliteConnection, name: &str, num: i64) -> Result<i64> {
    sqlx::query("INSERT INTO books (name, num) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .bind(num)
        .execute(&mut *conn)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM books WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn get_or_create_chapter(conn: &mut SqliteConnection, book_id: i64, num: i64) -> Result<i64> {
    sqlx::query("INSERT INTO chapters (book_id, num) VALUES (?, ?) ON CONFLICT(book_id, num) DO NOTHING")
        .bind(book_id)
        .bind(num)
        .execute(&mut *conn)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM chapters WHERE book_id = ? AND num = ?")
        .bind(book_id)
        .bind(num)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn get_or_create_verse(conn: &mut SqliteConnection, chapter_id: i64, num: i64) -> Result<i64> {
    sqlx::query("INSERT INTO verses (chapter_id, num) VALUES (?, ?) ON CONFLICT(chapter_id, num) DO NOTHING")
        .bind(chapter_id)
        .bind(num)
        .execute(&mut *conn)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM verses WHERE chapter_id = ? AND num = ?")
        .bind(chapter_id)
        .bind(num)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn insert_ms_verse(
    conn: &mut SqliteConnection,
    verse_id: i64,
    hand_id: i64,
    item: i64,
    text: &str,
) -> Result<i64> {
    let result = sqlx::query("INSERT INTO ms_verses (verse_id, hand_id, item, text) VALUES (?, ?, ?, ?)")
        .bind(verse_id)
        .bind(hand_id)
        .bind(item)
        .bind(text)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_books(pool: &SqlitePool) -> Result<Vec<Book>> {
    let books = sqlx::query_as::<_, Book>("SELECT * FROM books ORDER BY num, id")
        .fetch_all(pool)
        .await?;
    Ok(books)
}

pub async fn list_chapters(pool: &SqlitePool, book_id: i64) -> Result<Vec<Chapter>> {
    let chapters = sqlx::query_as::<_, Chapter>("SELECT * FROM chapters WHERE book_id = ? ORDER BY num")
        .bind(book_id)
        .fetch_all(pool)
        .await?;
    Ok(chapters)
}

pub async fn list_verses(pool: &SqlitePool, chapter_id: i64) -> Result<Vec<Verse>> {
    let verses = sqlx::query_as::<_, Verse>("SELECT * FROM verses WHERE chapter_id = ? ORDER BY num")
        .bind(chapter_id)
        .fetch_all(pool)
        .await?;
    Ok(verses)
}

/// Every witness/hand occurrence of a verse that has text
pub async fn verse_occurrences(pool: &SqlitePool, verse_id: i64) -> Result<Vec<Occurrence>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT id, text FROM ms_verses
        WHERE verse_id = ? AND TRIM(text) != ''
        ORDER BY id
        "#,
    )
    .bind(verse_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(ms_verse_id, text)| Occurrence { ms_verse_id, text })
        .collect())
}
