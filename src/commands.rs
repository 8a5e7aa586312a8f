//! Read-side CLI commands: browsing hadiths and narrators, fuzzy search,
//! isnad analysis and relation maintenance.
//!
//! Each `run_*` function opens its own pool, prints human-readable output to
//! stdout and returns.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::export::render_isnad;
use crate::hadiths::{self, HadithFilter};
use crate::llm::create_extractor;
use crate::matching::{self, AnalysisReport};
use crate::models::{HadithSummary, NarratorMatch};
use crate::narrators;
use crate::pagination::{Page, PageRequest};
use crate::relations;

const SNIPPET_CHARS: usize = 80;

fn snippet(text: &str) -> String {
    let mut out: String = text.chars().take(SNIPPET_CHARS).collect();
    if text.chars().count() > SNIPPET_CHARS {
        out.push('…');
    }
    out
}

fn print_hadith_page(page: &Page<HadithSummary>) {
    if page.data.is_empty() {
        println!("No hadiths found.");
        return;
    }
    for h in &page.data {
        let number = h.number.map(|n| format!("#{}", n)).unwrap_or_default();
        println!(
            "{:>6}  {:<7} {:>6}  {}",
            h.id,
            h.hadith_type.as_str(),
            number,
            snippet(&h.text)
        );
    }
    println!();
    println!(
        "page {}/{} ({} total)",
        page.pagination.page, page.pagination.total_pages, page.pagination.total
    );
}

pub async fn run_hadiths(config: &Config, filter: &HadithFilter, page: PageRequest) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = hadiths::list_hadiths(&pool, filter, page, &config.pagination).await;
    pool.close().await;
    print_hadith_page(&result?);
    Ok(())
}

pub async fn run_hadith(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let detail = hadiths::get_hadith(&pool, id).await;
    pool.close().await;
    let detail = detail?;
    let h = &detail.hadith;

    println!("--- Hadith {} ---", h.id);
    println!("source:       {}", detail.source_name);
    println!("book:         {}", detail.book_title);
    if let Some(ref chapter) = detail.chapter_title {
        println!("chapter:      {}", chapter);
    }
    if let Some(number) = h.number {
        println!("number:       {}", number);
    }
    println!("type:         {}", h.hadith_type);
    if let Some(ref grade) = h.grade {
        println!("grade:        {}", grade);
    }
    println!("created_at:   {}", detail.created_at);
    println!();

    println!("--- Chain ({}) ---", detail.chain.len());
    for link in &detail.chain {
        println!(
            "{:>3}. {} [{}] {}",
            link.position,
            link.narrator_name,
            link.narrator_id,
            link.verb.as_deref().unwrap_or("")
        );
    }
    if !detail.chain.is_empty() {
        println!();
        println!("{}", render_isnad(&detail.chain));
    }
    println!();

    println!("--- Text ---");
    println!("{}", h.text);
    if let Some(ref translation) = h.translation {
        println!();
        println!("--- Translation ---");
        println!("{}", translation);
    }
    Ok(())
}

pub async fn run_narrators(
    config: &Config,
    q: Option<&str>,
    tabaqa: Option<i64>,
    page: PageRequest,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = narrators::list_narrators(&pool, q, tabaqa, page, &config.pagination).await;
    pool.close().await;
    let page = result?;

    if page.data.is_empty() {
        println!("No narrators found.");
        return Ok(());
    }
    for n in &page.data {
        let tabaqa = n.tabaqa.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "{:>6}  {}  (tabaqa {}, {} hadith(s))",
            n.id, n.name, tabaqa, n.hadith_count
        );
    }
    println!();
    println!(
        "page {}/{} ({} total)",
        page.pagination.page, page.pagination.total_pages, page.pagination.total
    );
    Ok(())
}

pub async fn run_narrator(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let detail = narrators::get_narrator(&pool, id).await;
    pool.close().await;
    let n = detail?;

    println!("--- Narrator {} ---", n.id);
    println!("name:         {}", n.name);
    if let Some(ref kunya) = n.kunya {
        println!("kunya:        {}", kunya);
    }
    if let Some(ref laqab) = n.laqab {
        println!("laqab:        {}", laqab);
    }
    if let Some(tabaqa) = n.tabaqa {
        println!("tabaqa:       {}", tabaqa);
    }
    if let Some(ref grade) = n.grade {
        println!("grade:        {}", grade);
    }
    for death in &n.death_years {
        match death.note {
            Some(ref note) => println!("died:         {} AH ({})", death.year, note),
            None => println!("died:         {} AH", death.year),
        }
    }
    if let Some(ref bio) = n.bio {
        println!();
        println!("{}", bio);
    }

    println!();
    println!("--- Teachers ({}) ---", n.teachers.len());
    for t in &n.teachers {
        println!("{:>6}  {} ×{}", t.id, t.name, t.count);
    }
    println!();
    println!("--- Students ({}) ---", n.students.len());
    for s in &n.students {
        println!("{:>6}  {} ×{}", s.id, s.name, s.count);
    }
    Ok(())
}

fn print_matches(matches: &[NarratorMatch]) {
    for m in matches {
        match m.kunya {
            Some(ref kunya) => println!("  {:.3}  {:>6}  {} ({})", m.score, m.id, m.name, kunya),
            None => println!("  {:.3}  {:>6}  {}", m.score, m.id, m.name),
        }
    }
}

pub async fn run_search_narrator(config: &Config, name: &str, limit: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    let limit = limit.unwrap_or(config.matching.max_candidates).max(1);
    let result = matching::search_narrators(&pool, name, limit).await;
    pool.close().await;
    let matches = result?;

    if matches.is_empty() {
        println!("No matching narrators.");
    } else {
        print_matches(&matches);
    }
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    println!("extractor: {}", report.extractor);
    if report.chains.is_empty() {
        println!("No narrators found.");
        return;
    }
    for (i, chain) in report.chains.iter().enumerate() {
        println!();
        println!("--- Path {} ({} narrators) ---", i + 1, chain.narrators.len());
        for (j, n) in chain.narrators.iter().enumerate() {
            println!(
                "{:>3}. {} {}",
                j + 1,
                n.verb.as_deref().unwrap_or("-"),
                n.name
            );
            print_matches(&n.candidates);
        }
    }
}

pub async fn run_analyze(config: &Config, text: &str, with_matches: bool) -> Result<()> {
    let extractor = create_extractor(&config.llm)?;
    let pool = db::connect(config).await?;
    let result = matching::analyze_isnad(
        &pool,
        extractor.as_ref(),
        text,
        with_matches,
        &config.matching,
    )
    .await;
    pool.close().await;
    print_report(&result?);
    Ok(())
}

pub async fn run_rebuild_relations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = relations::rebuild_relations(&pool).await;
    pool.close().await;
    println!("Rebuilt {} narrator relation(s).", result?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_on_chars() {
        let long = "ح".repeat(100);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), SNIPPET_CHARS + 1);
        assert!(s.ends_with('…'));
        assert_eq!(snippet("قصير"), "قصير");
    }
}
