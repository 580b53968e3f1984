//! Database operations for stripey-cx

pub mod apparatus;
pub mod export;
pub mod records;

pub use apparatus::{
    drop_apparatus, find_uncollated, get_or_create_algorithm, is_collated, record_failure, save_apparatus, ChapterScope,
    VerseRef,
};
pub use export::{load_export_scope, ExportRange};
pub use records::WitnessIdentifiers;
