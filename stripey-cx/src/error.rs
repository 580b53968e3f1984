//! Error types for stripey-cx

use crate::apparatus::ApparatusError;
use crate::nexus::ExportError;
use crate::oracle::OracleError;
use crate::services::loader::LoadError;
use crate::witness::{HandResolutionError, ParseError};
use thiserror::Error;

/// Crate-level error
#[derive(Debug, Error)]
pub enum CollateError {
    #[error("Markup error: {0}")]
    Parse(#[from] ParseError),

    #[error("Hand resolution error: {0}")]
    Hand(#[from] HandResolutionError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Apparatus error: {0}")]
    Apparatus(#[from] ApparatusError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Common error: {0}")]
    Common(#[from] stripey_common::Error),

    #[error("Cancelled")]
    Cancelled,
}

pub type CollateResult<T> = std::result::Result<T, CollateError>;
