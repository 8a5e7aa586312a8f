//! Core data models used throughout the catalogue.
//!
//! Input types (`New*`, [`HadithBody`], [`BatchHadiths`]) deserialize from
//! request bodies and import files; output types serialize into API
//! responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CatalogError;

/// Attribution level of a hadith.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HadithType {
    /// Attributed to the Prophet.
    Marfu,
    /// Stops at a companion.
    Mawquf,
    /// Stops at a successor.
    Maqtu,
}

impl HadithType {
    pub const ALL: [HadithType; 3] = [HadithType::Marfu, HadithType::Mawquf, HadithType::Maqtu];

    pub fn as_str(&self) -> &'static str {
        match self {
            HadithType::Marfu => "marfu",
            HadithType::Mawquf => "mawquf",
            HadithType::Maqtu => "maqtu",
        }
    }
}

impl fmt::Display for HadithType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HadithType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "marfu" => Ok(HadithType::Marfu),
            "mawquf" => Ok(HadithType::Mawquf),
            "maqtu" => Ok(HadithType::Maqtu),
            other => Err(CatalogError::Invalid(format!(
                "unknown hadith type '{}' (expected marfu, mawquf, or maqtu)",
                other
            ))),
        }
    }
}

// ============ Catalogue hierarchy ============

#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub book_count: i64,
    pub hadith_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSource {
    pub name: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Book {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub number: Option<i64>,
    pub hadith_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBook {
    pub source_id: i64,
    pub title: String,
    #[serde(default)]
    pub number: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chapter {
    pub id: i64,
    pub book_id: i64,
    pub title: String,
    pub number: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChapter {
    pub book_id: i64,
    pub title: String,
    #[serde(default)]
    pub number: Option<i64>,
}

// ============ Hadiths ============

/// A hadith row without its chain, as listed in search results.
#[derive(Debug, Clone, Serialize)]
pub struct HadithSummary {
    pub id: i64,
    pub source_id: i64,
    pub book_id: i64,
    pub chapter_id: Option<i64>,
    pub number: Option<i64>,
    pub text: String,
    pub translation: Option<String>,
    pub hadith_type: HadithType,
    pub grade: Option<String>,
}

/// One link of a stored chain. Position 1 is closest to the Prophet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainLink {
    pub position: i64,
    pub narrator_id: i64,
    pub narrator_name: String,
    pub verb: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HadithDetail {
    #[serde(flatten)]
    pub hadith: HadithSummary,
    pub source_name: String,
    pub book_title: String,
    pub chapter_title: Option<String>,
    pub created_at: String,
    pub chain: Vec<ChainLink>,
}

/// A chain link supplied by a client. `position` may be omitted, in which
/// case links are numbered in list order starting at 1.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewChainLink {
    pub narrator_id: i64,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub verb: Option<String>,
}

/// Hadith fields shared by single and batch creation.
#[derive(Debug, Clone, Deserialize)]
pub struct HadithBody {
    #[serde(default)]
    pub chapter_id: Option<i64>,
    #[serde(default)]
    pub number: Option<i64>,
    pub text: String,
    #[serde(default)]
    pub translation: Option<String>,
    pub hadith_type: HadithType,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub chain: Vec<NewChainLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHadith {
    pub source_id: i64,
    pub book_id: i64,
    #[serde(flatten)]
    pub body: HadithBody,
}

/// Several hadiths from the same source and book. A per-entry
/// `chapter_id` overrides the batch-level one.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchHadiths {
    pub source_id: i64,
    pub book_id: i64,
    #[serde(default)]
    pub chapter_id: Option<i64>,
    pub hadiths: Vec<HadithBody>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    /// Ids of the inserted hadiths, in input order.
    pub created: Vec<i64>,
    /// Input indices skipped because the same text already exists in the book.
    pub skipped: Vec<usize>,
}

// ============ Narrators ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeathYear {
    /// Hijri year.
    pub year: i64,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NarratorSummary {
    pub id: i64,
    pub name: String,
    pub kunya: Option<String>,
    pub laqab: Option<String>,
    pub tabaqa: Option<i64>,
    pub grade: Option<String>,
    pub hadith_count: i64,
}

/// A teacher or student of a narrator with the number of shared chains.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedNarrator {
    pub id: i64,
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NarratorDetail {
    pub id: i64,
    pub name: String,
    pub kunya: Option<String>,
    pub laqab: Option<String>,
    pub tabaqa: Option<i64>,
    pub grade: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
    pub death_years: Vec<DeathYear>,
    pub teachers: Vec<RelatedNarrator>,
    pub students: Vec<RelatedNarrator>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewNarrator {
    pub name: String,
    #[serde(default)]
    pub kunya: Option<String>,
    #[serde(default)]
    pub laqab: Option<String>,
    #[serde(default)]
    pub tabaqa: Option<i64>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub death_years: Vec<DeathYear>,
}

/// A fuzzy-search hit for a narrator name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NarratorMatch {
    pub id: i64,
    pub name: String,
    pub kunya: Option<String>,
    pub score: f64,
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hadith_type_parse() {
        assert_eq!("Marfu".parse::<HadithType>().unwrap(), HadithType::Marfu);
        assert_eq!(" maqtu ".parse::<HadithType>().unwrap(), HadithType::Maqtu);
        assert!("sahih".parse::<HadithType>().is_err());
    }

    #[test]
    fn test_new_hadith_flattened_body() {
        let json = serde_json::json!({
            "source_id": 1,
            "book_id": 2,
            "text": "إنما الأعمال بالنيات",
            "hadith_type": "marfu",
            "chain": [{ "narrator_id": 7 }]
        });
        let h: NewHadith = serde_json::from_value(json).unwrap();
        assert_eq!(h.book_id, 2);
        assert_eq!(h.body.hadith_type, HadithType::Marfu);
        assert_eq!(h.body.chain.len(), 1);
        assert!(h.body.chain[0].position.is_none());
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
