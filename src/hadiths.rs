//! Hadith storage: filtered listing, detail lookup, creation (single and
//! batch) and deletion.
//!
//! Every write runs in one transaction and keeps `narrator_relations` in
//! step with the chains it inserts or removes.

use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashSet;

use crate::arabic::{escape_like, normalize_arabic};
use crate::config::PaginationConfig;
use crate::error::CatalogError;
use crate::models::{
    format_ts_iso, BatchHadiths, BatchResult, ChainLink, HadithBody, HadithDetail, HadithSummary,
    HadithType, NewChainLink, NewHadith,
};
use crate::pagination::{Page, PageRequest};
use crate::relations;

/// Filters accepted by [`list_hadiths`]. All set fields must match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HadithFilter {
    /// Substring of the (normalized) text or the translation.
    pub q: Option<String>,
    pub source_id: Option<i64>,
    pub book_id: Option<i64>,
    pub chapter_id: Option<i64>,
    pub hadith_type: Option<HadithType>,
    /// Narrator appearing anywhere in the chain.
    pub narrator_id: Option<i64>,
    /// Narrator at chain position 1 (musnad lookup).
    #[serde(skip)]
    pub first_narrator_id: Option<i64>,
}

enum Bind {
    Int(i64),
    Text(String),
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: SqliteQuery<'q>, binds: &'q [Bind]) -> SqliteQuery<'q> {
    for b in binds {
        query = match b {
            Bind::Int(v) => query.bind(*v),
            Bind::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

fn where_clause(filter: &HadithFilter) -> (String, Vec<Bind>) {
    let mut conds: Vec<&str> = Vec::new();
    let mut binds = Vec::new();

    if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        conds.push(
            "(h.text_normalized LIKE ? ESCAPE '\\' OR h.translation LIKE ? ESCAPE '\\')",
        );
        binds.push(Bind::Text(format!("%{}%", escape_like(&normalize_arabic(q)))));
        binds.push(Bind::Text(format!("%{}%", escape_like(q))));
    }
    if let Some(id) = filter.source_id {
        conds.push("h.source_id = ?");
        binds.push(Bind::Int(id));
    }
    if let Some(id) = filter.book_id {
        conds.push("h.book_id = ?");
        binds.push(Bind::Int(id));
    }
    if let Some(id) = filter.chapter_id {
        conds.push("h.chapter_id = ?");
        binds.push(Bind::Int(id));
    }
    if let Some(t) = filter.hadith_type {
        conds.push("h.hadith_type = ?");
        binds.push(Bind::Text(t.as_str().to_string()));
    }
    if let Some(id) = filter.narrator_id {
        conds.push(
            "EXISTS (SELECT 1 FROM hadith_narrators hn WHERE hn.hadith_id = h.id AND hn.narrator_id = ?)",
        );
        binds.push(Bind::Int(id));
    }
    if let Some(id) = filter.first_narrator_id {
        conds.push(
            "EXISTS (SELECT 1 FROM hadith_narrators hn WHERE hn.hadith_id = h.id AND hn.narrator_id = ? AND hn.position = 1)",
        );
        binds.push(Bind::Int(id));
    }

    if conds.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", conds.join(" AND ")), binds)
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<HadithSummary> {
    let hadith_type: String = row.get("hadith_type");
    Ok(HadithSummary {
        id: row.get("id"),
        source_id: row.get("source_id"),
        book_id: row.get("book_id"),
        chapter_id: row.get("chapter_id"),
        number: row.get("number"),
        text: row.get("text"),
        translation: row.get("translation"),
        hadith_type: hadith_type.parse()?,
        grade: row.get("grade"),
    })
}

pub async fn list_hadiths(
    pool: &SqlitePool,
    filter: &HadithFilter,
    page: PageRequest,
    cfg: &PaginationConfig,
) -> Result<Page<HadithSummary>> {
    let window = page.window(cfg);
    let (clause, binds) = where_clause(filter);

    let count_sql = format!("SELECT COUNT(*) AS total FROM hadiths h {}", clause);
    let total: i64 = bind_all(sqlx::query(&count_sql), &binds)
        .fetch_one(pool)
        .await?
        .get("total");

    let page_sql = format!(
        "SELECT h.id, h.source_id, h.book_id, h.chapter_id, h.number, h.text, h.translation, \
         h.hadith_type, h.grade FROM hadiths h {} \
         ORDER BY h.source_id, h.book_id, h.number IS NULL, h.number, h.id \
         LIMIT {} OFFSET {}",
        clause, window.limit, window.offset
    );
    let rows = bind_all(sqlx::query(&page_sql), &binds)
        .fetch_all(pool)
        .await?;

    let data = rows
        .iter()
        .map(summary_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(window.paginate(data, total))
}

pub async fn get_hadith(pool: &SqlitePool, id: i64) -> Result<HadithDetail> {
    let row = sqlx::query(
        r#"
        SELECT h.id, h.source_id, h.book_id, h.chapter_id, h.number, h.text, h.translation,
               h.hadith_type, h.grade, h.created_at,
               s.name AS source_name, b.title AS book_title, c.title AS chapter_title
        FROM hadiths h
        JOIN sources s ON s.id = h.source_id
        JOIN books b ON b.id = h.book_id
        LEFT JOIN chapters c ON c.id = h.chapter_id
        WHERE h.id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| CatalogError::not_found("hadith", id))?;

    let chain = load_chain(pool, id).await?;
    let created_at: i64 = row.get("created_at");

    Ok(HadithDetail {
        hadith: summary_from_row(&row)?,
        source_name: row.get("source_name"),
        book_title: row.get("book_title"),
        chapter_title: row.get("chapter_title"),
        created_at: format_ts_iso(created_at),
        chain,
    })
}

pub async fn load_chain(pool: &SqlitePool, hadith_id: i64) -> Result<Vec<ChainLink>> {
    let rows = sqlx::query(
        r#"
        SELECT hn.position, hn.narrator_id, n.name, hn.verb
        FROM hadith_narrators hn
        JOIN narrators n ON n.id = hn.narrator_id
        WHERE hn.hadith_id = ?
        ORDER BY hn.position
        "#,
    )
    .bind(hadith_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ChainLink {
            position: row.get("position"),
            narrator_id: row.get("narrator_id"),
            narrator_name: row.get("name"),
            verb: row.get("verb"),
        })
        .collect())
}

/// SHA-256 of the normalized text; identifies duplicate entries in a book.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_arabic(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Order a client-supplied chain and number it 1..n.
///
/// Either every link carries an explicit position or none does. Explicit
/// positions must be positive and unique; they define order only.
pub fn resolve_chain(links: &[NewChainLink]) -> Result<Vec<(i64, i64, Option<String>)>> {
    let explicit = links.iter().filter(|l| l.position.is_some()).count();
    if explicit != 0 && explicit != links.len() {
        return Err(CatalogError::Invalid(
            "chain positions must be given for every narrator or for none".to_string(),
        )
        .into());
    }

    let mut ordered: Vec<&NewChainLink> = links.iter().collect();
    if explicit > 0 {
        let mut seen = HashSet::new();
        for link in &ordered {
            let pos = link.position.unwrap_or_default();
            if pos < 1 {
                return Err(
                    CatalogError::Invalid(format!("chain position {} must be >= 1", pos)).into(),
                );
            }
            if !seen.insert(pos) {
                return Err(
                    CatalogError::Invalid(format!("duplicate chain position {}", pos)).into(),
                );
            }
        }
        ordered.sort_by_key(|l| l.position);
    }

    Ok(ordered
        .into_iter()
        .enumerate()
        .map(|(i, l)| {
            let verb = l
                .verb
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            (i as i64 + 1, l.narrator_id, verb)
        })
        .collect())
}

async fn check_hierarchy(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: i64,
    book_id: i64,
    chapter_id: Option<i64>,
) -> Result<()> {
    let source_exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sources WHERE id = ?")
        .bind(source_id)
        .fetch_one(&mut **tx)
        .await?;
    if !source_exists {
        return Err(CatalogError::not_found("source", source_id).into());
    }

    let book_source: Option<i64> = sqlx::query_scalar("SELECT source_id FROM books WHERE id = ?")
        .bind(book_id)
        .fetch_optional(&mut **tx)
        .await?;
    match book_source {
        None => return Err(CatalogError::not_found("book", book_id).into()),
        Some(s) if s != source_id => {
            return Err(CatalogError::Invalid(format!(
                "book {} does not belong to source {}",
                book_id, source_id
            ))
            .into())
        }
        Some(_) => {}
    }

    if let Some(chapter_id) = chapter_id {
        let chapter_book: Option<i64> =
            sqlx::query_scalar("SELECT book_id FROM chapters WHERE id = ?")
                .bind(chapter_id)
                .fetch_optional(&mut **tx)
                .await?;
        match chapter_book {
            None => return Err(CatalogError::not_found("chapter", chapter_id).into()),
            Some(b) if b != book_id => {
                return Err(CatalogError::Invalid(format!(
                    "chapter {} does not belong to book {}",
                    chapter_id, book_id
                ))
                .into())
            }
            Some(_) => {}
        }
    }

    Ok(())
}

async fn insert_hadith(
    tx: &mut Transaction<'_, Sqlite>,
    source_id: i64,
    book_id: i64,
    chapter_id: Option<i64>,
    body: &HadithBody,
    hash: &str,
) -> Result<i64> {
    let chain = resolve_chain(&body.chain)?;

    for (_, narrator_id, _) in &chain {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM narrators WHERE id = ?")
            .bind(narrator_id)
            .fetch_one(&mut **tx)
            .await?;
        if !exists {
            return Err(CatalogError::not_found("narrator", *narrator_id).into());
        }
    }

    let id = sqlx::query(
        r#"
        INSERT INTO hadiths (source_id, book_id, chapter_id, number, text, text_normalized,
                             translation, hadith_type, grade, text_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(source_id)
    .bind(book_id)
    .bind(chapter_id)
    .bind(body.number)
    .bind(body.text.trim())
    .bind(normalize_arabic(&body.text))
    .bind(&body.translation)
    .bind(body.hadith_type.as_str())
    .bind(&body.grade)
    .bind(hash)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();

    for (position, narrator_id, verb) in &chain {
        sqlx::query(
            "INSERT INTO hadith_narrators (hadith_id, narrator_id, position, verb) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(narrator_id)
        .bind(position)
        .bind(verb)
        .execute(&mut **tx)
        .await?;
    }

    let ids: Vec<i64> = chain.iter().map(|(_, n, _)| *n).collect();
    relations::record_chain(tx, &ids).await?;

    Ok(id)
}

fn require_text(body: &HadithBody) -> Result<()> {
    if body.text.trim().is_empty() {
        return Err(CatalogError::Invalid("hadith text must not be empty".to_string()).into());
    }
    Ok(())
}

pub async fn create_hadith(pool: &SqlitePool, input: &NewHadith) -> Result<i64> {
    require_text(&input.body)?;

    let mut tx = pool.begin().await?;
    check_hierarchy(&mut tx, input.source_id, input.book_id, input.body.chapter_id).await?;
    let hash = text_hash(&input.body.text);
    let id = insert_hadith(
        &mut tx,
        input.source_id,
        input.book_id,
        input.body.chapter_id,
        &input.body,
        &hash,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(id, book_id = input.book_id, chain_len = input.body.chain.len(), "hadith created");
    Ok(id)
}

/// Insert a batch atomically. Entries whose text already exists in the
/// book (including earlier entries of the same batch) are skipped.
pub async fn create_hadiths_batch(pool: &SqlitePool, batch: &BatchHadiths) -> Result<BatchResult> {
    for (i, body) in batch.hadiths.iter().enumerate() {
        require_text(body).map_err(|e| e.context(format!("batch entry {}", i)))?;
    }

    let mut tx = pool.begin().await?;
    check_hierarchy(&mut tx, batch.source_id, batch.book_id, batch.chapter_id).await?;

    let mut result = BatchResult::default();
    let mut checked_chapters: HashSet<i64> = batch.chapter_id.into_iter().collect();

    for (i, body) in batch.hadiths.iter().enumerate() {
        let chapter_id = body.chapter_id.or(batch.chapter_id);
        if let Some(c) = chapter_id {
            if checked_chapters.insert(c) {
                check_hierarchy(&mut tx, batch.source_id, batch.book_id, Some(c)).await?;
            }
        }

        let hash = text_hash(&body.text);
        let duplicate: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM hadiths WHERE book_id = ? AND text_hash = ?",
        )
        .bind(batch.book_id)
        .bind(&hash)
        .fetch_one(&mut *tx)
        .await?;
        if duplicate {
            result.skipped.push(i);
            continue;
        }

        let id = insert_hadith(&mut tx, batch.source_id, batch.book_id, chapter_id, body, &hash)
            .await
            .map_err(|e| e.context(format!("batch entry {}", i)))?;
        result.created.push(id);
    }

    tx.commit().await?;
    tracing::info!(
        book_id = batch.book_id,
        created = result.created.len(),
        skipped = result.skipped.len(),
        "hadith batch stored"
    );
    Ok(result)
}

pub async fn delete_hadith(pool: &SqlitePool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;

    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM hadiths WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if !exists {
        return Err(CatalogError::not_found("hadith", id).into());
    }

    let chain = relations::chain_ids(&mut tx, id).await?;
    relations::unrecord_chain(&mut tx, &chain).await?;

    sqlx::query("DELETE FROM hadith_narrators WHERE hadith_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM hadiths WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(id, "hadith deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_pool, new_hadith, seed_book, seed_narrators};

    fn link(narrator_id: i64, position: Option<i64>) -> NewChainLink {
        NewChainLink {
            narrator_id,
            position,
            verb: None,
        }
    }

    #[test]
    fn test_resolve_chain_implicit_positions() {
        let chain = resolve_chain(&[link(10, None), link(20, None), link(30, None)]).unwrap();
        let positions: Vec<(i64, i64)> = chain.iter().map(|(p, n, _)| (*p, *n)).collect();
        assert_eq!(positions, vec![(1, 10), (2, 20), (3, 30)]);
    }

    #[test]
    fn test_resolve_chain_sorts_explicit_positions() {
        let chain = resolve_chain(&[link(30, Some(7)), link(10, Some(2)), link(20, Some(5))]).unwrap();
        let ids: Vec<i64> = chain.iter().map(|(_, n, _)| *n).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(chain[2].0, 3);
    }

    #[test]
    fn test_resolve_chain_rejects_duplicates() {
        let err = resolve_chain(&[link(1, Some(1)), link(2, Some(1))]).unwrap_err();
        assert!(err.to_string().contains("duplicate chain position"));
    }

    #[test]
    fn test_resolve_chain_rejects_mixed() {
        assert!(resolve_chain(&[link(1, Some(1)), link(2, None)]).is_err());
    }

    #[test]
    fn test_resolve_chain_rejects_zero() {
        assert!(resolve_chain(&[link(1, Some(0))]).is_err());
    }

    #[test]
    fn test_text_hash_ignores_diacritics() {
        assert_eq!(text_hash("إِنَّمَا الأَعْمَالُ"), text_hash("انما الاعمال"));
        assert_ne!(text_hash("انما الاعمال"), text_hash("انما النيات"));
    }

    #[test]
    fn test_where_clause_empty() {
        let (clause, binds) = where_clause(&HadithFilter::default());
        assert!(clause.is_empty());
        assert!(binds.is_empty());
    }

    #[test]
    fn test_where_clause_binds_in_order() {
        let filter = HadithFilter {
            q: Some("النية".into()),
            book_id: Some(3),
            ..Default::default()
        };
        let (clause, binds) = where_clause(&filter);
        assert!(clause.starts_with("WHERE "));
        assert_eq!(binds.len(), 3);
        assert!(matches!(binds[2], Bind::Int(3)));
    }

    fn is_kind(err: &anyhow::Error, f: fn(&CatalogError) -> bool) -> bool {
        err.downcast_ref::<CatalogError>().is_some_and(f)
    }

    #[tokio::test]
    async fn test_create_and_get_with_chain() {
        let pool = memory_pool().await;
        let (source, book) = seed_book(&pool).await;
        let n = seed_narrators(&pool, &["عائشة", "عروة", "الزهري"]).await;

        let id = create_hadith(&pool, &new_hadith(source, book, "نص الحديث", &n))
            .await
            .unwrap();
        let detail = get_hadith(&pool, id).await.unwrap();
        assert_eq!(detail.book_title, "Purification");
        assert_eq!(detail.chain.len(), 3);
        assert_eq!(detail.chain[0].narrator_name, "عائشة");
        assert_eq!(detail.chain[2].position, 3);

        let err = get_hadith(&pool, id + 100).await.unwrap_err();
        assert!(is_kind(&err, |e| matches!(e, CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_book_must_belong_to_source() {
        let pool = memory_pool().await;
        let (_, book) = seed_book(&pool).await;
        let other = crate::sources::create_source(
            &pool,
            &crate::models::NewSource {
                name: "Other".into(),
                author: None,
                description: None,
            },
        )
        .await
        .unwrap();

        let err = create_hadith(&pool, &new_hadith(other, book, "نص", &[]))
            .await
            .unwrap_err();
        assert!(is_kind(&err, |e| matches!(e, CatalogError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let pool = memory_pool().await;
        let (source, book) = seed_book(&pool).await;
        let n = seed_narrators(&pool, &["أنس"]).await;

        let good = new_hadith(source, book, "حديث صحيح", &n).body;
        let bad = new_hadith(source, book, "حديث آخر", &[n[0], 404]).body;
        let batch = BatchHadiths {
            source_id: source,
            book_id: book,
            chapter_id: None,
            hadiths: vec![good, bad],
        };

        let err = create_hadiths_batch(&pool, &batch).await.unwrap_err();
        assert!(format!("{:#}", err).contains("batch entry 1"));
        assert!(is_kind(&err, |e| matches!(e, CatalogError::NotFound(_))));

        let page = list_hadiths(
            &pool,
            &HadithFilter::default(),
            PageRequest::default(),
            &PaginationConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(page.pagination.total, 0);
    }

    #[tokio::test]
    async fn test_batch_skips_duplicates_within_batch() {
        let pool = memory_pool().await;
        let (source, book) = seed_book(&pool).await;

        let batch = BatchHadiths {
            source_id: source,
            book_id: book,
            chapter_id: None,
            hadiths: vec![
                new_hadith(source, book, "الطهور شطر الإيمان", &[]).body,
                new_hadith(source, book, "الطُّهُورُ شَطْرُ الإِيمَانِ", &[]).body,
            ],
        };
        let result = create_hadiths_batch(&pool, &batch).await.unwrap();
        assert_eq!(result.created.len(), 1);
        assert_eq!(result.skipped, vec![1]);
    }
}
