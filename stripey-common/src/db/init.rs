//! Database initialization
//!
//! Creates the database on first run and brings the schema up to date.
//! Every statement is idempotent, so this is safe to call on each startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Busy timeout applied to every connection
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Parallel collation workers each hold a connection while writing a verse
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Record storage
    create_witnesses_table(pool).await?;
    create_hands_table(pool).await?;
    create_books_table(pool).await?;
    create_chapters_table(pool).await?;
    create_verses_table(pool).await?;
    create_ms_verses_table(pool).await?;

    // Apparatus
    create_algorithms_table(pool).await?;
    create_variants_table(pool).await?;
    create_readings_table(pool).await?;
    create_stripes_table(pool).await?;
    create_stripe_readings_table(pool).await?;
    create_ms_stripes_table(pool).await?;
    create_collation_failures_table(pool).await?;

    Ok(())
}

async fn create_witnesses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS witnesses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ms_ref TEXT NOT NULL UNIQUE,
            xml_filename TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT '',
            ms_name TEXT NOT NULL DEFAULT '',
            tischendorf TEXT NOT NULL DEFAULT '',
            ga TEXT NOT NULL DEFAULT '',
            liste_id INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_hands_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hands (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            witness_id INTEGER NOT NULL REFERENCES witnesses(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            UNIQUE(witness_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_books_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            num INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_chapters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            num INTEGER NOT NULL,
            UNIQUE(book_id, num)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_verses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chapter_id INTEGER NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
            num INTEGER NOT NULL,
            UNIQUE(chapter_id, num)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One witness/hand occurrence of a verse
///
/// `item` numbers repeated occurrences of the same verse in commentary manuscripts.
async fn create_ms_verses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ms_verses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            verse_id INTEGER NOT NULL REFERENCES verses(id) ON DELETE CASCADE,
            hand_id INTEGER NOT NULL REFERENCES hands(id) ON DELETE CASCADE,
            item INTEGER NOT NULL DEFAULT 0,
            text TEXT NOT NULL,
            UNIQUE(verse_id, hand_id, item)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ms_verses_verse ON ms_verses(verse_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_algorithms_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS algorithms (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_variants_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS variants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            verse_id INTEGER NOT NULL REFERENCES verses(id) ON DELETE CASCADE,
            algorithm_id INTEGER NOT NULL REFERENCES algorithms(id) ON DELETE CASCADE,
            variant_num INTEGER NOT NULL,
            UNIQUE(verse_id, algorithm_id, variant_num)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_readings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            variant_id INTEGER NOT NULL REFERENCES variants(id) ON DELETE CASCADE,
            label INTEGER NOT NULL,
            text TEXT NOT NULL,
            UNIQUE(variant_id, text),
            UNIQUE(variant_id, label)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Stripes are unique per (verse, algorithm, signature)
///
/// The signature is the comma-joined reading ids in variant order.
async fn create_stripes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stripes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            verse_id INTEGER NOT NULL REFERENCES verses(id) ON DELETE CASCADE,
            algorithm_id INTEGER NOT NULL REFERENCES algorithms(id) ON DELETE CASCADE,
            signature TEXT NOT NULL,
            UNIQUE(verse_id, algorithm_id, signature)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stripe_readings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stripe_readings (
            stripe_id INTEGER NOT NULL REFERENCES stripes(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            reading_id INTEGER NOT NULL REFERENCES readings(id) ON DELETE CASCADE,
            PRIMARY KEY(stripe_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ms_stripes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ms_stripes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ms_verse_id INTEGER NOT NULL REFERENCES ms_verses(id) ON DELETE CASCADE,
            stripe_id INTEGER NOT NULL REFERENCES stripes(id) ON DELETE CASCADE,
            algorithm_id INTEGER NOT NULL REFERENCES algorithms(id) ON DELETE CASCADE,
            UNIQUE(ms_verse_id, algorithm_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_collation_failures_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collation_failures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            verse_id INTEGER NOT NULL REFERENCES verses(id) ON DELETE CASCADE,
            algorithm_id INTEGER NOT NULL REFERENCES algorithms(id) ON DELETE CASCADE,
            error TEXT NOT NULL,
            failed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
