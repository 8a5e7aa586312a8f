//! Narrator fuzzy search and isnad-to-record matching.
//!
//! Names extracted from an isnad rarely match a stored record verbatim: the
//! text may give only the ism (`سفيان`), a longer nasab than the record, or
//! a variant spelling. [`match_name`] therefore runs several fuzzy searches,
//! shortening the nasab each time, and keeps the first attempt that yields
//! candidates above `matching.min_score`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::arabic::{escape_like, normalize_arabic};
use crate::config::MatchingConfig;
use crate::error::CatalogError;
use crate::isnad::IsnadAnalysis;
use crate::llm::IsnadExtractor;
use crate::models::{NarratorMatch, NewChainLink};

/// Tokens that join name parts and carry no identifying weight.
const CONNECTORS: &[&str] = &["بن", "ابن", "بنت", "ابي", "ابو", "ام"];

/// Upper bound on rows pulled from SQLite before scoring.
const PREFILTER_LIMIT: i64 = 300;

#[derive(Debug, Clone, Serialize)]
pub struct MatchedNarrator {
    pub name: String,
    pub verb: Option<String>,
    /// The search string that produced `candidates`.
    pub query: String,
    pub candidates: Vec<NarratorMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedChain {
    pub narrators: Vec<MatchedNarrator>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub extractor: String,
    pub chains: Vec<MatchedChain>,
}

/// Similarity of a normalized query against one stored narrator.
pub fn score_candidate(
    query: &str,
    name: &str,
    kunya: Option<&str>,
    laqab: Option<&str>,
) -> f64 {
    let name = normalize_arabic(name);
    if name == query {
        return 1.0;
    }
    let alias_hit = [kunya, laqab]
        .into_iter()
        .flatten()
        .any(|alias| normalize_arabic(alias) == query);
    if alias_hit {
        return 1.0;
    }

    let mut score = strsim::jaro_winkler(query, &name);
    // The text often gives a shorter nasab than the record.
    if name.starts_with(&format!("{} ", query)) {
        score = score.max(0.9);
    }
    score
}

/// Rank stored narrators by similarity to `name`.
pub async fn search_narrators(
    pool: &SqlitePool,
    name: &str,
    limit: usize,
) -> Result<Vec<NarratorMatch>> {
    let query = normalize_arabic(name);
    if query.is_empty() {
        return Err(CatalogError::Invalid("name must not be empty".to_string()).into());
    }

    let mut tokens: Vec<&str> = query
        .split(' ')
        .filter(|t| !CONNECTORS.contains(t))
        .collect();
    if tokens.is_empty() {
        tokens = query.split(' ').collect();
    }
    tokens.truncate(6);

    let conds = vec![
        "n.name_normalized LIKE ? ESCAPE '\\' OR n.aliases_normalized LIKE ? ESCAPE '\\'";
        tokens.len()
    ]
    .join(" OR ");
    let sql = format!(
        "SELECT n.id, n.name, n.kunya, n.laqab FROM narrators n WHERE {} LIMIT ?",
        conds
    );

    let mut q = sqlx::query(&sql);
    for token in &tokens {
        let pattern = format!("%{}%", escape_like(token));
        q = q.bind(pattern.clone()).bind(pattern);
    }
    let rows = q.bind(PREFILTER_LIMIT).fetch_all(pool).await?;

    let mut matches: Vec<NarratorMatch> = rows
        .iter()
        .map(|row| {
            let name: String = row.get("name");
            let kunya: Option<String> = row.get("kunya");
            let laqab: Option<String> = row.get("laqab");
            NarratorMatch {
                id: row.get("id"),
                score: score_candidate(&query, &name, kunya.as_deref(), laqab.as_deref()),
                name,
                kunya,
            }
        })
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    matches.truncate(limit);
    Ok(matches)
}

/// Search strings for one extracted name, most specific first:
/// `X بن Y بن Z`, `X بن Y`, `X`.
pub fn name_variants(name: &str) -> Vec<String> {
    let norm = normalize_arabic(name);
    let tokens: Vec<&str> = norm.split(' ').filter(|t| !t.is_empty()).collect();

    let mut variants = vec![tokens.join(" ")];
    for (i, tok) in tokens.iter().enumerate().rev() {
        if i > 0 && (*tok == "بن" || *tok == "ابن") {
            let shorter = tokens[..i].join(" ");
            if !variants.contains(&shorter) {
                variants.push(shorter);
            }
        }
    }
    variants.retain(|v| !v.is_empty());
    variants
}

/// Match one extracted name against stored narrators.
pub async fn match_name(
    pool: &SqlitePool,
    name: &str,
    cfg: &MatchingConfig,
) -> Result<(String, Vec<NarratorMatch>)> {
    let variants = name_variants(name);
    let mut last_query = normalize_arabic(name);

    for variant in variants {
        let candidates: Vec<NarratorMatch> =
            search_narrators(pool, &variant, cfg.max_candidates)
                .await?
                .into_iter()
                .filter(|m| m.score >= cfg.min_score)
                .collect();
        if !candidates.is_empty() {
            return Ok((variant, candidates));
        }
        last_query = variant;
    }

    Ok((last_query, Vec::new()))
}

pub async fn match_analysis(
    pool: &SqlitePool,
    analysis: &IsnadAnalysis,
    cfg: &MatchingConfig,
) -> Result<Vec<MatchedChain>> {
    let mut chains = Vec::with_capacity(analysis.chains.len());
    for chain in &analysis.chains {
        let mut narrators = Vec::with_capacity(chain.narrators.len());
        for n in &chain.narrators {
            let (query, candidates) = match_name(pool, &n.name, cfg).await?;
            narrators.push(MatchedNarrator {
                name: n.name.clone(),
                verb: n.verb.clone(),
                query,
                candidates,
            });
        }
        chains.push(MatchedChain { narrators });
    }
    Ok(chains)
}

/// Extract narrators from `text` and, if `with_matches`, attach candidates.
pub async fn analyze_isnad(
    pool: &SqlitePool,
    extractor: &dyn IsnadExtractor,
    text: &str,
    with_matches: bool,
    cfg: &MatchingConfig,
) -> Result<AnalysisReport> {
    if text.trim().is_empty() {
        return Err(CatalogError::Invalid("isnad text must not be empty".to_string()).into());
    }

    let analysis = extractor.extract(text).await?;
    tracing::info!(
        extractor = extractor.name(),
        chains = analysis.chains.len(),
        narrators = analysis.narrator_count(),
        "isnad extracted"
    );

    let chains = if with_matches {
        match_analysis(pool, &analysis, cfg).await?
    } else {
        analysis
            .chains
            .iter()
            .map(|c| MatchedChain {
                narrators: c
                    .narrators
                    .iter()
                    .map(|n| MatchedNarrator {
                        name: n.name.clone(),
                        verb: n.verb.clone(),
                        query: normalize_arabic(&n.name),
                        candidates: Vec::new(),
                    })
                    .collect(),
            })
            .collect()
    };

    Ok(AnalysisReport {
        extractor: extractor.name().to_string(),
        chains,
    })
}

/// Convert a matched path into chain links in storage order.
///
/// Text order runs from the compiler's teacher to the companion; storage
/// position 1 is the companion, so the path is reversed. Every narrator must
/// have at least one candidate; the best one is used.
pub fn to_chain(chain: &MatchedChain) -> Result<Vec<NewChainLink>> {
    chain
        .narrators
        .iter()
        .rev()
        .map(|n| {
            let best = n.candidates.first().ok_or_else(|| {
                CatalogError::Invalid(format!("no stored narrator matches '{}'", n.name))
            })?;
            Ok(NewChainLink {
                narrator_id: best.id,
                position: None,
                verb: n.verb.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_variants_shorten_nasab() {
        assert_eq!(
            name_variants("محمد بن مسلم بن شهاب"),
            vec!["محمد بن مسلم بن شهاب", "محمد بن مسلم", "محمد"]
        );
    }

    #[test]
    fn test_name_variants_keep_leading_ibn() {
        assert_eq!(name_variants("ابن عمر"), vec!["ابن عمر"]);
    }

    #[test]
    fn test_score_exact_and_alias() {
        assert_eq!(score_candidate("مالك بن انس", "مالك بن أنس", None, None), 1.0);
        assert_eq!(
            score_candidate("ابو هريره", "عبد الرحمن بن صخر", Some("أبو هريرة"), None),
            1.0
        );
    }

    #[test]
    fn test_score_prefix_of_longer_name() {
        let s = score_candidate("سفيان", "سفيان بن عيينة", None, None);
        assert!(s >= 0.9, "score {}", s);
    }

    #[test]
    fn test_score_unrelated_is_low() {
        let s = score_candidate("نافع", "عبد الله بن المبارك", None, None);
        assert!(s < 0.7, "score {}", s);
    }

    #[test]
    fn test_to_chain_reverses_and_requires_matches() {
        let m = |name: &str, id: Option<i64>| MatchedNarrator {
            name: name.into(),
            verb: Some("عن".into()),
            query: name.into(),
            candidates: id
                .map(|id| {
                    vec![NarratorMatch {
                        id,
                        name: name.into(),
                        kunya: None,
                        score: 1.0,
                    }]
                })
                .unwrap_or_default(),
        };

        let chain = MatchedChain {
            narrators: vec![m("مالك", Some(3)), m("نافع", Some(2)), m("ابن عمر", Some(1))],
        };
        let links = to_chain(&chain).unwrap();
        let ids: Vec<i64> = links.iter().map(|l| l.narrator_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let broken = MatchedChain {
            narrators: vec![m("مالك", Some(3)), m("مجهول", None)],
        };
        assert!(to_chain(&broken).is_err());
    }
}
