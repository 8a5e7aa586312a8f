//! Narrator records, their death years, and their place in the transmission
//! graph (teachers, students, musnad).

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::arabic::{escape_like, normalize_arabic};
use crate::config::PaginationConfig;
use crate::error::CatalogError;
use crate::hadiths::{self, HadithFilter};
use crate::models::{
    format_ts_iso, DeathYear, HadithSummary, NarratorDetail, NarratorSummary, NewNarrator,
    RelatedNarrator,
};
use crate::pagination::{Page, PageRequest};

pub async fn create_narrator(pool: &SqlitePool, input: &NewNarrator) -> Result<i64> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(CatalogError::Invalid("narrator name must not be empty".to_string()).into());
    }
    if let Some(bad) = input.death_years.iter().find(|d| d.year <= 0) {
        return Err(
            CatalogError::Invalid(format!("death year {} must be positive", bad.year)).into(),
        );
    }

    let aliases = [input.kunya.as_deref(), input.laqab.as_deref()]
        .into_iter()
        .flatten()
        .map(normalize_arabic)
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut tx = pool.begin().await?;

    let id = sqlx::query(
        r#"
        INSERT INTO narrators (name, name_normalized, kunya, laqab, aliases_normalized,
                               tabaqa, grade, bio, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(normalize_arabic(name))
    .bind(&input.kunya)
    .bind(&input.laqab)
    .bind(&aliases)
    .bind(input.tabaqa)
    .bind(&input.grade)
    .bind(&input.bio)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for death in &input.death_years {
        sqlx::query("INSERT INTO narrator_death_years (narrator_id, year, note) VALUES (?, ?, ?)")
            .bind(id)
            .bind(death.year)
            .bind(&death.note)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    tracing::info!(id, name = %name, "narrator created");
    Ok(id)
}

pub async fn list_narrators(
    pool: &SqlitePool,
    q: Option<&str>,
    tabaqa: Option<i64>,
    page: PageRequest,
    cfg: &PaginationConfig,
) -> Result<Page<NarratorSummary>> {
    let window = page.window(cfg);
    let pattern = q
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", escape_like(&normalize_arabic(q))));

    // NULL parameters disable their filter.
    let where_sql = r#"
        WHERE (?1 IS NULL
               OR n.name_normalized LIKE ?1 ESCAPE '\'
               OR n.aliases_normalized LIKE ?1 ESCAPE '\')
          AND (?2 IS NULL OR n.tabaqa = ?2)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM narrators n {}", where_sql))
        .bind(&pattern)
        .bind(tabaqa)
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(&format!(
        r#"
        SELECT n.id, n.name, n.kunya, n.laqab, n.tabaqa, n.grade,
               (SELECT COUNT(DISTINCT hn.hadith_id) FROM hadith_narrators hn
                WHERE hn.narrator_id = n.id) AS hadith_count
        FROM narrators n
        {}
        ORDER BY n.tabaqa IS NULL, n.tabaqa, n.name_normalized, n.id
        LIMIT ?3 OFFSET ?4
        "#,
        where_sql
    ))
    .bind(&pattern)
    .bind(tabaqa)
    .bind(window.limit)
    .bind(window.offset)
    .fetch_all(pool)
    .await?;

    let data = rows
        .iter()
        .map(|row| NarratorSummary {
            id: row.get("id"),
            name: row.get("name"),
            kunya: row.get("kunya"),
            laqab: row.get("laqab"),
            tabaqa: row.get("tabaqa"),
            grade: row.get("grade"),
            hadith_count: row.get("hadith_count"),
        })
        .collect();

    Ok(window.paginate(data, total))
}

pub async fn narrator_exists(pool: &SqlitePool, id: i64) -> Result<bool> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM narrators WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?,
    )
}

async fn related(pool: &SqlitePool, sql: &str, id: i64) -> Result<Vec<RelatedNarrator>> {
    let rows = sqlx::query(sql).bind(id).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| RelatedNarrator {
            id: row.get("id"),
            name: row.get("name"),
            count: row.get("count"),
        })
        .collect())
}

pub async fn get_narrator(pool: &SqlitePool, id: i64) -> Result<NarratorDetail> {
    let row = sqlx::query(
        "SELECT id, name, kunya, laqab, tabaqa, grade, bio, created_at FROM narrators WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| CatalogError::not_found("narrator", id))?;

    let death_years = sqlx::query(
        "SELECT year, note FROM narrator_death_years WHERE narrator_id = ? ORDER BY year, id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|r| DeathYear {
        year: r.get("year"),
        note: r.get("note"),
    })
    .collect();

    let teachers = related(
        pool,
        r#"
        SELECT n.id, n.name, r.count FROM narrator_relations r
        JOIN narrators n ON n.id = r.teacher_id
        WHERE r.student_id = ?
        ORDER BY r.count DESC, n.id
        "#,
        id,
    )
    .await?;

    let students = related(
        pool,
        r#"
        SELECT n.id, n.name, r.count FROM narrator_relations r
        JOIN narrators n ON n.id = r.student_id
        WHERE r.teacher_id = ?
        ORDER BY r.count DESC, n.id
        "#,
        id,
    )
    .await?;

    let created_at: i64 = row.get("created_at");

    Ok(NarratorDetail {
        id: row.get("id"),
        name: row.get("name"),
        kunya: row.get("kunya"),
        laqab: row.get("laqab"),
        tabaqa: row.get("tabaqa"),
        grade: row.get("grade"),
        bio: row.get("bio"),
        created_at: format_ts_iso(created_at),
        death_years,
        teachers,
        students,
    })
}

/// Delete a narrator that no chain refers to.
pub async fn delete_narrator(pool: &SqlitePool, id: i64) -> Result<()> {
    if !narrator_exists(pool, id).await? {
        return Err(CatalogError::not_found("narrator", id).into());
    }

    let references: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM hadith_narrators WHERE narrator_id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
    if references > 0 {
        return Err(CatalogError::Conflict(format!(
            "narrator {} appears in {} chain link(s)",
            id, references
        ))
        .into());
    }

    sqlx::query("DELETE FROM narrators WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    tracing::info!(id, "narrator deleted");
    Ok(())
}

/// Hadiths whose chain starts with this narrator.
pub async fn musnad(
    pool: &SqlitePool,
    id: i64,
    page: PageRequest,
    cfg: &PaginationConfig,
) -> Result<Page<HadithSummary>> {
    if !narrator_exists(pool, id).await? {
        return Err(CatalogError::not_found("narrator", id).into());
    }
    let filter = HadithFilter {
        first_narrator_id: Some(id),
        ..Default::default()
    };
    hadiths::list_hadiths(pool, &filter, page, cfg).await
}

/// Hadiths in which this narrator appears anywhere in the chain.
pub async fn narrator_hadiths(
    pool: &SqlitePool,
    id: i64,
    page: PageRequest,
    cfg: &PaginationConfig,
) -> Result<Page<HadithSummary>> {
    if !narrator_exists(pool, id).await? {
        return Err(CatalogError::not_found("narrator", id).into());
    }
    let filter = HadithFilter {
        narrator_id: Some(id),
        ..Default::default()
    };
    hadiths::list_hadiths(pool, &filter, page, cfg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hadiths::create_hadith;
    use crate::test_support::{memory_pool, new_hadith, seed_book, seed_narrators};

    fn narrator(name: &str) -> NewNarrator {
        NewNarrator {
            name: name.into(),
            kunya: None,
            laqab: None,
            tabaqa: None,
            grade: None,
            bio: None,
            death_years: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let pool = memory_pool().await;
        assert!(create_narrator(&pool, &narrator("  ")).await.is_err());

        let mut bad_year = narrator("سعيد بن المسيب");
        bad_year.death_years = vec![DeathYear { year: 0, note: None }];
        assert!(create_narrator(&pool, &bad_year).await.is_err());

        let mut two_years = narrator("سعيد بن المسيب");
        two_years.death_years = vec![
            DeathYear { year: 94, note: None },
            DeathYear { year: 93, note: Some("قيل".into()) },
        ];
        let id = create_narrator(&pool, &two_years).await.unwrap();
        let detail = get_narrator(&pool, id).await.unwrap();
        assert_eq!(detail.death_years[0].year, 93);
        assert_eq!(detail.death_years.len(), 2);
    }

    #[tokio::test]
    async fn test_list_matches_kunya_and_folded_name() {
        let pool = memory_pool().await;
        let mut abu_hurayra = narrator("عبد الرحمن بن صخر");
        abu_hurayra.kunya = Some("أبو هريرة".into());
        abu_hurayra.tabaqa = Some(1);
        create_narrator(&pool, &abu_hurayra).await.unwrap();
        create_narrator(&pool, &narrator("إسماعيل بن أبي خالد")).await.unwrap();

        let cfg = PaginationConfig::default();
        let page = list_narrators(&pool, Some("هريرة"), None, PageRequest::default(), &cfg)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.data[0].kunya.as_deref(), Some("أبو هريرة"));

        let page = list_narrators(&pool, Some("اسماعيل"), None, PageRequest::default(), &cfg)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);

        let page = list_narrators(&pool, None, Some(1), PageRequest::default(), &cfg)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);
    }

    #[tokio::test]
    async fn test_teachers_students_and_musnad() {
        let pool = memory_pool().await;
        let (source, book) = seed_book(&pool).await;
        let n = seed_narrators(&pool, &["ابن عباس", "عكرمة", "أيوب", "طاوس"]).await;
        create_hadith(&pool, &new_hadith(source, book, "أ", &[n[0], n[1], n[2]]))
            .await
            .unwrap();
        create_hadith(&pool, &new_hadith(source, book, "ب", &[n[0], n[1]]))
            .await
            .unwrap();
        create_hadith(&pool, &new_hadith(source, book, "ج", &[n[0], n[3]]))
            .await
            .unwrap();

        let ibn_abbas = get_narrator(&pool, n[0]).await.unwrap();
        assert!(ibn_abbas.teachers.is_empty());
        let students: Vec<(i64, i64)> = ibn_abbas.students.iter().map(|s| (s.id, s.count)).collect();
        assert_eq!(students, vec![(n[1], 2), (n[3], 1)]);

        let cfg = PaginationConfig::default();
        let page = musnad(&pool, n[0], PageRequest::default(), &cfg).await.unwrap();
        assert_eq!(page.pagination.total, 3);
        let page = musnad(&pool, n[1], PageRequest::default(), &cfg).await.unwrap();
        assert_eq!(page.pagination.total, 0);
        let page = narrator_hadiths(&pool, n[1], PageRequest::default(), &cfg)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);
    }

    #[tokio::test]
    async fn test_delete_referenced_is_conflict() {
        let pool = memory_pool().await;
        let (source, book) = seed_book(&pool).await;
        let n = seed_narrators(&pool, &["جابر", "أبو الزبير", "مجهول"]).await;
        create_hadith(&pool, &new_hadith(source, book, "نص", &[n[0], n[1]]))
            .await
            .unwrap();

        let err = delete_narrator(&pool, n[1]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::Conflict(_))
        ));

        delete_narrator(&pool, n[2]).await.unwrap();
        let err = get_narrator(&pool, n[2]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::NotFound(_))
        ));
    }
}
