//! Witness loader
//!
//! Parses a folder of TEI transcriptions and stores every hand's resolved
//! text per verse. Each witness is written in its own transaction, so a bad
//! document leaves nothing behind and loading moves on to the next file.

use crate::db::records::{
    create_witness, find_witness, get_or_create_book, get_or_create_chapter, get_or_create_hand, get_or_create_verse,
    insert_ms_verse, mark_witness_loaded,
};
use crate::db::WitnessIdentifiers;
use crate::utils::begin_monitored;
use crate::witness::{HandResolutionError, Manuscript, ParseError, VerseText};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("No witness reference in file name: {0}")]
    BadFileName(PathBuf),

    #[error("{0}: no book title in document")]
    NoBook(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Hand(#[from] HandResolutionError),

    #[error(transparent)]
    Database(#[from] stripey_common::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    AlreadyLoaded,
}

#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// `*.xml` files directly inside a folder, sorted by name
pub fn scan_transcriptions(folder: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if !folder.exists() {
        return Err(LoadError::PathNotFound(folder.to_path_buf()));
    }
    if !folder.is_dir() {
        return Err(LoadError::NotADirectory(folder.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder).max_depth(1).follow_links(false) {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                let is_xml = path
                    .extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("xml"));
                if entry.file_type().is_file() && is_xml {
                    files.push(path.to_path_buf());
                }
            }
            Err(e) => warn!("Error accessing entry: {}", e),
        }
    }
    files.sort();
    Ok(files)
}

/// One verse occurrence in document order: chapter, verse and hand texts
type ResolvedVerse = (i64, i64, Vec<VerseText>);

/// Load one transcription; the file stem is the witness reference
pub async fn load_witness(pool: &SqlitePool, path: &Path) -> Result<LoadOutcome, LoadError> {
    let ms_ref = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| LoadError::BadFileName(path.to_path_buf()))?;
    let xml_filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(ms_ref);

    if let Some(existing) = find_witness(pool, ms_ref).await? {
        if existing.is_loaded() {
            info!(witness = %ms_ref, "Already loaded");
            return Ok(LoadOutcome::AlreadyLoaded);
        }
    }

    let ms = Manuscript::from_file(ms_ref, path)?;
    let book = ms.book.clone().ok_or_else(|| LoadError::NoBook(ms_ref.to_string()))?;

    // Resolve every text before touching the database
    let mut resolved: Vec<ResolvedVerse> = Vec::new();
    for chapter in ms.chapters.values() {
        for (num, occurrences) in &chapter.verses {
            for verse in occurrences {
                let texts = verse.get_texts(&ms.order_of_hands)?;
                resolved.push((chapter.num as i64, *num as i64, texts));
            }
        }
    }

    let mut tx = begin_monitored(pool, "loader::load_witness").await?;

    let ids = WitnessIdentifiers::from_ms_desc(&ms.ms_desc);
    let witness_id = create_witness(tx.conn(), ms_ref, xml_filename, &ids).await?;
    let book_id = get_or_create_book(tx.conn(), &book, ms.book_num.unwrap_or(0)).await?;

    let mut hands: HashMap<String, i64> = HashMap::new();
    let mut chapters: HashMap<i64, i64> = HashMap::new();
    // Next free item per (verse id, hand id)
    let mut next_item: HashMap<(i64, i64), i64> = HashMap::new();
    let mut stored = 0;

    for (chapter_num, verse_num, texts) in &resolved {
        let chapter_id = match chapters.get(chapter_num) {
            Some(id) => *id,
            None => {
                let id = get_or_create_chapter(tx.conn(), book_id, *chapter_num).await?;
                chapters.insert(*chapter_num, id);
                id
            }
        };
        let verse_id = get_or_create_verse(tx.conn(), chapter_id, *verse_num).await?;

        let mut seen_here: HashSet<&str> = HashSet::new();
        for VerseText { hand, text } in texts {
            let hand_id = match hands.get(hand) {
                Some(id) => *id,
                None => {
                    let id = get_or_create_hand(tx.conn(), witness_id, hand).await?;
                    hands.insert(hand.clone(), id);
                    id
                }
            };
            let slot = next_item.entry((verse_id, hand_id)).or_insert(0);
            let item = *slot;
            *slot += 1;
            if !seen_here.insert(hand.as_str()) {
                // Several reading types of one hand share a label
                warn!(
                    witness = %ms_ref,
                    hand = %hand,
                    chapter = chapter_num,
                    verse = verse_num,
                    item,
                    "Hand has more than one text in this verse, storing as a further item"
                );
            }
            insert_ms_verse(tx.conn(), verse_id, hand_id, item, text).await?;
            stored += 1;
        }
    }

    mark_witness_loaded(tx.conn(), witness_id).await?;
    tx.commit().await?;

    info!(
        witness = %ms_ref,
        book = %book,
        chapters = chapters.len(),
        hands = hands.len(),
        verses = stored,
        "Loaded witness"
    );
    Ok(LoadOutcome::Loaded)
}

/// Load every transcription in a folder, continuing past failures
pub async fn load_folder(pool: &SqlitePool, folder: &Path) -> Result<LoadSummary, LoadError> {
    let files = scan_transcriptions(folder)?;
    info!("Found {} transcriptions in {}", files.len(), folder.display());

    let mut summary = LoadSummary::default();
    for (i, path) in files.iter().enumerate() {
        let name = path.display().to_string();
        debug!("{}/{}: {}", i + 1, files.len(), name);

        match load_witness(pool, path).await {
            Ok(LoadOutcome::Loaded) => summary.loaded.push(name),
            Ok(LoadOutcome::AlreadyLoaded) => summary.skipped.push(name),
            Err(e) => {
                error!(file = %name, error = %e, "Failed to load witness");
                summary.failed.push((name, e.to_string()));
            }
        }
    }

    if !summary.failed.is_empty() {
        warn!("{} transcriptions failed to load", summary.failed.len());
    }
    Ok(summary)
}
