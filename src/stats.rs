//! Catalogue statistics.
//!
//! A quick summary of what's stored: sources, books, chapters, hadiths per
//! attribution level, narrators, and teacher/student edges. Used by
//! `isnad stats` and `GET /api/stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::db;
use crate::models::HadithType;

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub sources: i64,
    pub books: i64,
    pub chapters: i64,
    pub hadiths: i64,
    pub hadiths_by_type: BTreeMap<String, i64>,
    pub narrators: i64,
    pub relations: i64,
    /// Hadiths stored without any chain link.
    pub hadiths_without_chain: i64,
}

async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?)
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<CatalogStats> {
    let mut hadiths_by_type: BTreeMap<String, i64> = HadithType::ALL
        .iter()
        .map(|t| (t.as_str().to_string(), 0))
        .collect();

    let rows = sqlx::query("SELECT hadith_type, COUNT(*) AS n FROM hadiths GROUP BY hadith_type")
        .fetch_all(pool)
        .await?;
    for row in &rows {
        hadiths_by_type.insert(row.get("hadith_type"), row.get("n"));
    }

    let hadiths_without_chain: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM hadiths h \
         WHERE NOT EXISTS (SELECT 1 FROM hadith_narrators hn WHERE hn.hadith_id = h.id)",
    )
    .fetch_one(pool)
    .await?;

    Ok(CatalogStats {
        sources: count(pool, "sources").await?,
        books: count(pool, "books").await?,
        chapters: count(pool, "chapters").await?,
        hadiths: count(pool, "hadiths").await?,
        hadiths_by_type,
        narrators: count(pool, "narrators").await?,
        relations: count(pool, "narrator_relations").await?,
        hadiths_without_chain,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Isnad Catalog: Database Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Sources:     {}", stats.sources);
    println!("  Books:       {}", stats.books);
    println!("  Chapters:    {}", stats.chapters);
    println!("  Hadiths:     {}", stats.hadiths);
    for (kind, n) in &stats.hadiths_by_type {
        println!("    {:<9} {}", kind, n);
    }
    println!("  No chain:    {}", stats.hadiths_without_chain);
    println!("  Narrators:   {}", stats.narrators);
    println!("  Relations:   {}", stats.relations);

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(12), "12 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
