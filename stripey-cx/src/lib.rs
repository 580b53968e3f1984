//! stripey-cx library interface
//!
//! Extracts witness texts from TEI transcriptions, aligns them verse by verse
//! with an external CollateX service, stores the resulting apparatus and
//! exports it as a NEXUS character matrix.

pub mod apparatus;
pub mod config;
pub mod db;
pub mod error;
pub mod nexus;
pub mod oracle;
pub mod services;
pub mod utils;
pub mod witness;

pub use crate::error::{CollateError, CollateResult};
