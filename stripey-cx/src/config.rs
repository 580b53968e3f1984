//! Configuration resolution for stripey-cx
//!
//! Command-line values override the TOML file, which overrides the compiled
//! defaults already filled in by `stripey_common::config`.

use crate::nexus::{Alphabet, ExportError, ExportOptions};
use crate::oracle::{CollatexProcess, HttpOracleClient, OracleError, OracleSupervisor};
use regex::Regex;
use std::time::Duration;
use stripey_common::config::{CollateConfig, ExportConfig, OracleConfig};
use stripey_common::{Error, Result};
use tracing::{debug, info};

/// Command-line overrides for a collation run
#[derive(Debug, Clone, Default)]
pub struct CollateOverrides {
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub port: Option<u16>,
}

impl CollateOverrides {
    pub fn apply(&self, oracle: &mut OracleConfig, collate: &mut CollateConfig) {
        if let Some(workers) = self.workers {
            collate.workers = workers;
        }
        if let Some(timeout) = self.timeout_secs {
            oracle.timeout_secs = timeout;
        }
        if let Some(port) = self.port {
            oracle.port = port;
        }
        debug!(
            workers = collate.workers,
            timeout_secs = oracle.timeout_secs,
            port = oracle.port,
            "Resolved collation settings"
        );
    }
}

/// Parallel collations granted to the oracle process
pub fn oracle_parallelism(oracle: &OracleConfig, workers: usize) -> usize {
    oracle.max_parallel.unwrap_or(workers.max(1) * 2)
}

/// Supervised CollateX service as configured
pub fn build_oracle(oracle: &OracleConfig, workers: usize) -> std::result::Result<OracleSupervisor, OracleError> {
    let process = CollatexProcess::new(
        oracle.java.clone(),
        oracle.jar_path.clone(),
        oracle.port,
        oracle_parallelism(oracle, workers),
        Duration::from_secs(oracle.startup_grace_secs),
    );
    let client = HttpOracleClient::new(oracle.port, Duration::from_secs(oracle.timeout_secs))?;
    info!(
        port = oracle.port,
        jar = %oracle.jar_path.display(),
        timeout_secs = oracle.timeout_secs,
        "Configured CollateX"
    );
    Ok(OracleSupervisor::new(Box::new(process), Box::new(client)))
}

/// Command-line overrides for a matrix export
#[derive(Debug, Clone, Default)]
pub struct ExportOverrides {
    pub digits: bool,
    pub exclude: Vec<String>,
    pub fragmentary_threshold: Option<f64>,
}

/// Resolve export options; command-line exclusions add to the configured ones
pub fn export_options(config: &ExportConfig, overrides: &ExportOverrides) -> Result<ExportOptions> {
    let alphabet = if overrides.digits {
        Alphabet::Digits
    } else {
        Alphabet::parse(&config.alphabet)
            .ok_or_else(|| Error::Config(format!("Unknown alphabet '{}' (letters or digits)", config.alphabet)))?
    };

    let threshold = overrides
        .fragmentary_threshold
        .unwrap_or(config.fragmentary_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::InvalidInput(format!(
            "Fragmentary threshold must be between 0 and 1, got {}",
            threshold
        )));
    }

    let exclude = config
        .exclude
        .iter()
        .chain(overrides.exclude.iter())
        .map(|pattern| Regex::new(pattern))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(ExportError::BadPattern(e).to_string()))?;

    Ok(ExportOptions {
        alphabet,
        exclude,
        fragmentary_threshold: threshold,
    })
}
