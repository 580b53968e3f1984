//! # Stripey Common Library
//!
//! Shared code for the stripey collation tools including:
//! - Database schema initialization and row models
//! - Configuration loading and root folder resolution
//! - Logging bootstrap
//! - Common error type

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
