//! Export scope queries

use super::records::list_witnesses;
use crate::nexus::{taxon_label, ExportScope, TaxonData, UnitRef};
use crate::oracle::Algorithm;
use sqlx::SqlitePool;
use std::collections::HashMap;
use stripey_common::{Error, Result};
use tracing::debug;

/// A book, optionally narrowed to one chapter or one verse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRange {
    pub book_num: i64,
    pub chapter: Option<i64>,
    pub verse: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct UnitRow {
    variant_id: i64,
    verse_id: i64,
    chapter: i64,
    verse: i64,
    variant_num: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct CellRow {
    witness_id: i64,
    hand_id: i64,
    hand: String,
    verse_id: i64,
    item: i64,
    variant_id: i64,
    label: i64,
}

/// Load the units and per-taxon readings for an export
///
/// A witness/hand with several occurrences of one verse contributes the
/// stripe of its first occurrence.
pub async fn load_export_scope(pool: &SqlitePool, algorithm: Algorithm, range: ExportRange) -> Result<ExportScope> {
    if range.verse.is_some() && range.chapter.is_none() {
        return Err(Error::InvalidInput("A verse needs a chapter".to_string()));
    }

    let units = sqlx::query_as::<_, UnitRow>(
        r#"
        SELECT var.id AS variant_id, v.id AS verse_id, c.num AS chapter, v.num AS verse, var.variant_num
        FROM variants var
        JOIN algorithms a ON a.id = var.algorithm_id
        JOIN verses v ON v.id = var.verse_id
        JOIN chapters c ON c.id = v.chapter_id
        JOIN books b ON b.id = c.book_id
        WHERE a.name = ? AND b.num = ?
          AND (? IS NULL OR c.num = ?)
          AND (? IS NULL OR v.num = ?)
        ORDER BY c.num, v.num, var.variant_num
        "#,
    )
    .bind(algorithm.as_str())
    .bind(range.book_num)
    .bind(range.chapter)
    .bind(range.chapter)
    .bind(range.verse)
    .bind(range.verse)
    .fetch_all(pool)
    .await?;

    let cells = sqlx::query_as::<_, CellRow>(
        r#"
        SELECT h.witness_id, h.id AS hand_id, h.name AS hand, s.verse_id, mv.item,
               r.variant_id, r.label
        FROM ms_stripes ms
        JOIN ms_verses mv ON mv.id = ms.ms_verse_id
        JOIN hands h ON h.id = mv.hand_id
        JOIN stripes s ON s.id = ms.stripe_id
        JOIN algorithms a ON a.id = s.algorithm_id
        JOIN stripe_readings sr ON sr.stripe_id = s.id
        JOIN readings r ON r.id = sr.reading_id
        JOIN verses v ON v.id = s.verse_id
        JOIN chapters c ON c.id = v.chapter_id
        JOIN books b ON b.id = c.book_id
        WHERE a.name = ? AND b.num = ?
          AND (? IS NULL OR c.num = ?)
          AND (? IS NULL OR v.num = ?)
        ORDER BY h.witness_id, h.id, s.verse_id, mv.item, sr.position
        "#,
    )
    .bind(algorithm.as_str())
    .bind(range.book_num)
    .bind(range.chapter)
    .bind(range.chapter)
    .bind(range.verse)
    .bind(range.verse)
    .fetch_all(pool)
    .await?;

    let witnesses: HashMap<i64, _> = list_witnesses(pool)
        .await?
        .into_iter()
        .map(|w| (w.id, w))
        .collect();

    let mut taxa: Vec<TaxonData> = Vec::new();
    let mut taxon_index: HashMap<i64, usize> = HashMap::new();
    // First occurrence item per (hand, verse)
    let mut first_item: HashMap<(i64, i64), i64> = HashMap::new();

    for cell in cells {
        let item = *first_item.entry((cell.hand_id, cell.verse_id)).or_insert(cell.item);
        if item != cell.item {
            continue;
        }

        let idx = match taxon_index.get(&cell.hand_id) {
            Some(idx) => *idx,
            None => {
                let witness = witnesses
                    .get(&cell.witness_id)
                    .ok_or_else(|| Error::NotFound(format!("witness {}", cell.witness_id)))?;
                debug!(witness = %witness.display_ref(), hand = %cell.hand, "New taxon");
                taxa.push(TaxonData {
                    label: taxon_label(witness.display_short(), &cell.hand),
                    witness_ref: witness.ms_ref.clone(),
                    ..TaxonData::default()
                });
                taxon_index.insert(cell.hand_id, taxa.len() - 1);
                taxa.len() - 1
            }
        };

        let taxon = &mut taxa[idx];
        taxon.verses.insert(cell.verse_id);
        if let Some(previous) = taxon.readings.insert(cell.variant_id, cell.label) {
            return Err(Error::Internal(format!(
                "{} has readings {} and {} at variant {} of verse {}",
                taxon.label, previous, cell.label, cell.variant_id, cell.verse_id
            )));
        }
    }

    Ok(ExportScope {
        units: units
            .into_iter()
            .map(|u| UnitRef {
                variant_id: u.variant_id,
                verse_id: u.verse_id,
                chapter: u.chapter,
                verse: u.verse,
                variant_num: u.variant_num,
            })
            .collect(),
        taxa,
    })
}
