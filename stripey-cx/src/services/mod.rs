//! Services: loading witnesses, driving collation runs, checking the oracle

pub mod loader;
pub mod orchestrator;
pub mod selftest;

pub use loader::{load_folder, load_witness, scan_transcriptions, LoadError, LoadOutcome, LoadSummary};
pub use orchestrator::{CollateSettings, CollateSummary, Collator};
pub use selftest::{run_selftest, SelftestError};
