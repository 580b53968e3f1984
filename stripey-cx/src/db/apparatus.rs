//! Apparatus repository
//!
//! Persists variant units, readings and stripes per (verse, algorithm).
//! A verse counts as collated as soon as it has any variant for the
//! algorithm, so every verse is written in a single transaction.

use crate::apparatus::ApparatusPlan;
use crate::oracle::Algorithm;
use crate::utils::{begin_monitored, retry_on_lock};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use stripey_common::{Error, Result};
use tracing::{debug, warn};

/// A verse by its catalogue position
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VerseRef {
    pub book: String,
    pub book_num: i64,
    pub chapter: i64,
    pub verse: i64,
}

/// Limits a bulk delete to one chapter of one book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterScope {
    pub book_num: i64,
    pub chapter: i64,
}

impl std::str::FromStr for ChapterScope {
    type Err = Error;

    /// Parse "BB:CC", e.g. "04:11"
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidInput(format!("Expected book:chapter (e.g. 04:11), got '{}'", s));
        let (book, chapter) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            book_num: book.trim().parse().map_err(|_| invalid())?,
            chapter: chapter.trim().parse().map_err(|_| invalid())?,
        })
    }
}

pub async fn get_or_create_algorithm(pool: &SqlitePool, algorithm: Algorithm) -> Result<i64> {
    sqlx::query("INSERT INTO algorithms (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(algorithm.as_str())
        .execute(pool)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM algorithms WHERE name = ?")
        .bind(algorithm.as_str())
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Has this verse any variant unit under this algorithm?
pub async fn is_collated(pool: &SqlitePool, verse_id: i64, algorithm_id: i64) -> Result<bool> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM variants WHERE verse_id = ? AND algorithm_id = ?)",
    )
    .bind(verse_id)
    .bind(algorithm_id)
    .fetch_one(pool)
    .await?;
    Ok(exists != 0)
}

/// Write one verse's apparatus; returns false if the verse was already collated
pub async fn save_apparatus(
    pool: &SqlitePool,
    verse_id: i64,
    algorithm_id: i64,
    plan: &ApparatusPlan,
    max_lock_wait_ms: u64,
) -> Result<bool> {
    retry_on_lock("save apparatus", max_lock_wait_ms, || {
        save_apparatus_once(pool, verse_id, algorithm_id, plan)
    })
    .await
}

async fn save_apparatus_once(pool: &SqlitePool, verse_id: i64, algorithm_id: i64, plan: &ApparatusPlan) -> Result<bool> {
    let mut tx = begin_monitored(pool, "apparatus::save_apparatus").await?;

    let already: i64 = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM variants WHERE verse_id = ? AND algorithm_id = ?)",
    )
    .bind(verse_id)
    .bind(algorithm_id)
    .fetch_one(tx.conn())
    .await?;
    if already != 0 {
        tx.rollback().await?;
        debug!(verse_id, algorithm_id, "Verse already collated, not saving");
        return Ok(false);
    }

    // Reading ids per unit, by label
    let mut reading_ids: Vec<HashMap<i64, i64>> = Vec::with_capacity(plan.units.len());
    for unit in &plan.units {
        let variant_id = sqlx::query("INSERT INTO variants (verse_id, algorithm_id, variant_num) VALUES (?, ?, ?)")
            .bind(verse_id)
            .bind(algorithm_id)
            .bind(unit.variant_num)
            .execute(tx.conn())
            .await?
            .last_insert_rowid();

        let mut ids = HashMap::with_capacity(unit.readings.len());
        for reading in &unit.readings {
            let reading_id = sqlx::query("INSERT INTO readings (variant_id, label, text) VALUES (?, ?, ?)")
                .bind(variant_id)
                .bind(reading.label)
                .bind(&reading.text)
                .execute(tx.conn())
                .await?
                .last_insert_rowid();
            ids.insert(reading.label, reading_id);
        }
        reading_ids.push(ids);
    }

    for stripe in &plan.stripes {
        let readings = stripe
            .labels
            .iter()
            .enumerate()
            .map(|(unit, label)| {
                reading_ids
                    .get(unit)
                    .and_then(|ids| ids.get(label))
                    .copied()
                    .ok_or_else(|| Error::Internal(format!("Stripe refers to unknown reading {} at unit {}", label, unit)))
            })
            .collect::<Result<Vec<i64>>>()?;

        let stripe_id = find_or_create_stripe(tx.conn(), verse_id, algorithm_id, &readings).await?;

        for ms_verse_id in &stripe.members {
            sqlx::query("INSERT INTO ms_stripes (ms_verse_id, stripe_id, algorithm_id) VALUES (?, ?, ?)")
                .bind(ms_verse_id)
                .bind(stripe_id)
                .bind(algorithm_id)
                .execute(tx.conn())
                .await?;
        }
    }

    tx.commit().await?;
    debug!(
        verse_id,
        algorithm_id,
        units = plan.units.len(),
        stripes = plan.stripes.len(),
        "Saved apparatus"
    );
    Ok(true)
}

/// Stripes are looked up by their ordered reading ids before a new one is made
async fn find_or_create_stripe(
    conn: &mut SqliteConnection,
    verse_id: i64,
    algorithm_id: i64,
    readings: &[i64],
) -> Result<i64> {
    let signature = readings
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM stripes WHERE verse_id = ? AND algorithm_id = ? AND signature = ?",
    )
    .bind(verse_id)
    .bind(algorithm_id)
    .bind(&signature)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let stripe_id = sqlx::query("INSERT INTO stripes (verse_id, algorithm_id, signature) VALUES (?, ?, ?)")
        .bind(verse_id)
        .bind(algorithm_id)
        .bind(&signature)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

    for (position, reading_id) in readings.iter().enumerate() {
        sqlx::query("INSERT INTO stripe_readings (stripe_id, position, reading_id) VALUES (?, ?, ?)")
            .bind(stripe_id)
            .bind(position as i64)
            .bind(reading_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(stripe_id)
}

/// Delete all apparatus data for an algorithm, optionally for one chapter only
///
/// Readings, stripe links and witness links go with their variants and
/// stripes. Returns the number of variants and stripes deleted.
pub async fn drop_apparatus(pool: &SqlitePool, algorithm: Algorithm, scope: Option<ChapterScope>) -> Result<u64> {
    warn!(algorithm = %algorithm, scope = ?scope, "Clearing out old collation data");

    let Some(algorithm_id) = sqlx::query_scalar::<_, i64>("SELECT id FROM algorithms WHERE name = ?")
        .bind(algorithm.as_str())
        .fetch_optional(pool)
        .await?
    else {
        return Ok(0);
    };

    let (book_num, chapter) = match scope {
        Some(s) => (Some(s.book_num), Some(s.chapter)),
        None => (None, None),
    };

    let mut tx = begin_monitored(pool, "apparatus::drop_apparatus").await?;
    let mut deleted = 0;

    for table in ["variants", "stripes", "collation_failures"] {
        let sql = format!(
            r#"
            DELETE FROM {table}
            WHERE algorithm_id = ?
              AND (? IS NULL OR verse_id IN (
                    SELECT v.id FROM verses v
                    JOIN chapters c ON c.id = v.chapter_id
                    JOIN books b ON b.id = c.book_id
                    WHERE b.num = ? AND c.num = ?))
            "#
        );
        let result = sqlx::query(&sql)
            .bind(algorithm_id)
            .bind(book_num)
            .bind(book_num)
            .bind(chapter)
            .execute(tx.conn())
            .await?;
        if table != "collation_failures" {
            deleted += result.rows_affected();
        }
    }

    tx.commit().await?;
    warn!(algorithm = %algorithm, deleted, "Deleted collation data");
    Ok(deleted)
}

/// Note a failed collation attempt
pub async fn record_failure(pool: &SqlitePool, verse_id: i64, algorithm_id: i64, error: &str) -> Result<()> {
    sqlx::query("INSERT INTO collation_failures (verse_id, algorithm_id, error, failed_at) VALUES (?, ?, ?, ?)")
        .bind(verse_id)
        .bind(algorithm_id)
        .bind(error)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn failure_count(pool: &SqlitePool, verse_id: i64, algorithm_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collation_failures WHERE verse_id = ? AND algorithm_id = ?")
        .bind(verse_id)
        .bind(algorithm_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Verses with text that have no variant for the algorithm, in catalogue order
pub async fn find_uncollated(pool: &SqlitePool, algorithm: Algorithm) -> Result<Vec<VerseRef>> {
    let verses = sqlx::query_as::<_, VerseRef>(
        r#"
        SELECT b.name AS book, b.num AS book_num, c.num AS chapter, v.num AS verse
        FROM verses v
        JOIN chapters c ON c.id = v.chapter_id
        JOIN books b ON b.id = c.book_id
        WHERE EXISTS (SELECT 1 FROM ms_verses mv WHERE mv.verse_id = v.id AND TRIM(mv.text) != '')
          AND NOT EXISTS (
                SELECT 1 FROM variants var
                JOIN algorithms a ON a.id = var.algorithm_id
                WHERE var.verse_id = v.id AND a.name = ?)
        ORDER BY b.num, c.num, v.num
        "#,
    )
    .bind(algorithm.as_str())
    .fetch_all(pool)
    .await?;
    Ok(verses)
}

/// Number of variant units stored for a verse
pub async fn unit_count(pool: &SqlitePool, verse_id: i64, algorithm_id: i64) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM variants WHERE verse_id = ? AND algorithm_id = ?")
        .bind(verse_id)
        .bind(algorithm_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Ordered reading ids of every stripe of a verse
pub async fn stripe_profiles(pool: &SqlitePool, verse_id: i64, algorithm_id: i64) -> Result<Vec<Vec<i64>>> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT s.id, sr.reading_id
        FROM stripes s
        JOIN stripe_readings sr ON sr.stripe_id = s.id
        WHERE s.verse_id = ? AND s.algorithm_id = ?
        ORDER BY s.id, sr.position
        "#,
    )
    .bind(verse_id)
    .bind(algorithm_id)
    .fetch_all(pool)
    .await?;

    let mut profiles: Vec<(i64, Vec<i64>)> = Vec::new();
    for (stripe_id, reading_id) in rows {
        match profiles.last_mut() {
            Some((id, readings)) if *id == stripe_id => readings.push(reading_id),
            _ => profiles.push((stripe_id, vec![reading_id])),
        }
    }
    Ok(profiles.into_iter().map(|(_, readings)| readings).collect())
}
