//! Database models

use serde::{Deserialize, Serialize};

/// A manuscript transcription
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Witness {
    pub id: i64,
    pub ms_ref: String,
    pub xml_filename: String,
    pub status: String,
    pub ms_name: String,
    pub tischendorf: String,
    pub ga: String,
    pub liste_id: Option<i64>,
}

impl Witness {
    /// Status value once the markup has been loaded
    pub const STATUS_LOADED: &'static str = "loaded";

    pub fn is_loaded(&self) -> bool {
        self.status == Self::STATUS_LOADED
    }

    /// A combination of the catalogue identifiers, e.g. "Sinaiticus, 01, GA:01"
    pub fn display_ref(&self) -> String {
        let mut parts = Vec::new();
        if !self.ms_name.is_empty() {
            parts.push(self.ms_name.clone());
        }
        if !self.tischendorf.is_empty() {
            parts.push(self.tischendorf.clone());
        }
        if !self.ga.is_empty() {
            parts.push(format!("GA:{}", self.ga));
        }
        if parts.is_empty() {
            return self.ms_ref.clone();
        }
        parts.join(", ")
    }

    /// Shortest useful reference: Tischendorf siglum, then GA number, then file reference
    pub fn display_short(&self) -> &str {
        if !self.tischendorf.is_empty() {
            &self.tischendorf
        } else if !self.ga.is_empty() {
            &self.ga
        } else {
            &self.ms_ref
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Book {
    pub id: i64,
    pub name: String,
    pub num: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chapter {
    pub id: i64,
    pub book_id: i64,
    pub num: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Verse {
    pub id: i64,
    pub chapter_id: i64,
    pub num: i64,
}
