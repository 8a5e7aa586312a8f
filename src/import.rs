//! Bulk import of hadiths from JSON files.
//!
//! An import file holds either one batch object or an array of them:
//!
//! ```json
//! {
//!   "source_id": 1,
//!   "book_id": 1,
//!   "chapter_id": 2,
//!   "hadiths": [
//!     { "number": 1, "text": "...", "hadith_type": "marfu",
//!       "chain": [{ "narrator_id": 4 }, { "narrator_id": 9, "verb": "عن" }] }
//!   ]
//! }
//! ```
//!
//! Each batch is committed on its own. Texts already stored in the same book
//! are skipped, so re-running an import is harmless.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::hadiths;
use crate::models::{BatchHadiths, BatchResult};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Many(Vec<BatchHadiths>),
    One(BatchHadiths),
}

/// Parse the contents of an import file into batches.
pub fn parse_import(content: &str) -> Result<Vec<BatchHadiths>> {
    let file: ImportFile =
        serde_json::from_str(content).context("import file is not a hadith batch or a list of batches")?;
    Ok(match file {
        ImportFile::Many(batches) => batches,
        ImportFile::One(batch) => vec![batch],
    })
}

/// Insert every batch, stopping at the first one that fails.
pub async fn import_batches(pool: &SqlitePool, batches: &[BatchHadiths]) -> Result<BatchResult> {
    let mut total = BatchResult::default();
    for (i, batch) in batches.iter().enumerate() {
        let result = hadiths::create_hadiths_batch(pool, batch)
            .await
            .with_context(|| format!("batch {}", i))?;
        total.created.extend(result.created);
        total.skipped.extend(result.skipped);
    }
    Ok(total)
}

/// CLI entry point for `isnad import <file>`.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let batches = parse_import(&content)?;

    let pool = db::connect(config).await?;
    let result = import_batches(&pool, &batches).await;
    pool.close().await;
    let result = result?;

    println!(
        "Imported {} hadith(s) from {} batch(es), skipped {} duplicate(s).",
        result.created.len(),
        batches.len(),
        result.skipped.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_batch() {
        let batches = parse_import(
            r#"{"source_id":1,"book_id":2,"hadiths":[{"text":"نص","hadith_type":"maqtu"}]}"#,
        )
        .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].book_id, 2);
        assert!(batches[0].chapter_id.is_none());
    }

    #[test]
    fn test_parse_list_of_batches() {
        let batches = parse_import(
            r#"[{"source_id":1,"book_id":1,"hadiths":[]},{"source_id":1,"book_id":3,"chapter_id":4,"hadiths":[]}]"#,
        )
        .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].chapter_id, Some(4));
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        assert!(parse_import(r#"{"hadiths": "nope"}"#).is_err());
        assert!(parse_import("not json").is_err());
    }
}
