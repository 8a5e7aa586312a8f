//! Sources, books and chapters: the hierarchy every hadith hangs off.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::error::CatalogError;
use crate::models::{Book, Chapter, NewBook, NewChapter, NewSource, Source};

fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::Invalid(format!("{} must not be empty", field)).into());
    }
    Ok(trimmed.to_string())
}

/// Turn a UNIQUE violation into `Conflict`; other database errors pass
/// through. Covers inserts racing past the existence checks below.
fn unique_conflict(err: sqlx::Error, message: String) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            CatalogError::Conflict(message).into()
        }
        _ => err.into(),
    }
}

pub async fn create_source(pool: &SqlitePool, input: &NewSource) -> Result<i64> {
    let name = require_text("name", &input.name)?;

    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sources WHERE name = ?")
        .bind(&name)
        .fetch_one(pool)
        .await?;
    if exists {
        return Err(CatalogError::Conflict(format!("source '{}' already exists", name)).into());
    }

    let id = sqlx::query(
        "INSERT INTO sources (name, author, description, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&name)
    .bind(&input.author)
    .bind(&input.description)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await
    .map_err(|e| unique_conflict(e, format!("source '{}' already exists", name)))?
    .last_insert_rowid();

    tracing::info!(id, name = %name, "source created");
    Ok(id)
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, s.name, s.author, s.description,
               (SELECT COUNT(*) FROM books b WHERE b.source_id = s.id) AS book_count,
               (SELECT COUNT(*) FROM hadiths h WHERE h.source_id = s.id) AS hadith_count
        FROM sources s
        ORDER BY s.name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Source {
            id: row.get("id"),
            name: row.get("name"),
            author: row.get("author"),
            description: row.get("description"),
            book_count: row.get("book_count"),
            hadith_count: row.get("hadith_count"),
        })
        .collect())
}

pub async fn source_exists(pool: &SqlitePool, id: i64) -> Result<bool> {
    Ok(
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sources WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?,
    )
}

pub async fn create_book(pool: &SqlitePool, input: &NewBook) -> Result<i64> {
    let title = require_text("title", &input.title)?;

    if !source_exists(pool, input.source_id).await? {
        return Err(CatalogError::not_found("source", input.source_id).into());
    }

    let duplicate: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM books WHERE source_id = ? AND title = ?")
            .bind(input.source_id)
            .bind(&title)
            .fetch_one(pool)
            .await?;
    if duplicate {
        return Err(CatalogError::Conflict(format!(
            "book '{}' already exists in source {}",
            title, input.source_id
        ))
        .into());
    }

    let id = sqlx::query(
        "INSERT INTO books (source_id, title, number, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(input.source_id)
    .bind(&title)
    .bind(input.number)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await
    .map_err(|e| {
        unique_conflict(
            e,
            format!("book '{}' already exists in source {}", title, input.source_id),
        )
    })?
    .last_insert_rowid();

    Ok(id)
}

pub async fn list_books(pool: &SqlitePool, source_id: i64) -> Result<Vec<Book>> {
    if !source_exists(pool, source_id).await? {
        return Err(CatalogError::not_found("source", source_id).into());
    }

    let rows = sqlx::query(
        r#"
        SELECT b.id, b.source_id, b.title, b.number,
               (SELECT COUNT(*) FROM hadiths h WHERE h.book_id = b.id) AS hadith_count
        FROM books b
        WHERE b.source_id = ?
        ORDER BY b.number IS NULL, b.number, b.id
        "#,
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Book {
            id: row.get("id"),
            source_id: row.get("source_id"),
            title: row.get("title"),
            number: row.get("number"),
            hadith_count: row.get("hadith_count"),
        })
        .collect())
}

pub async fn create_chapter(pool: &SqlitePool, input: &NewChapter) -> Result<i64> {
    let title = require_text("title", &input.title)?;

    let book_exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM books WHERE id = ?")
        .bind(input.book_id)
        .fetch_one(pool)
        .await?;
    if !book_exists {
        return Err(CatalogError::not_found("book", input.book_id).into());
    }

    let id = sqlx::query(
        "INSERT INTO chapters (book_id, title, number, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(input.book_id)
    .bind(&title)
    .bind(input.number)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn list_chapters(pool: &SqlitePool, book_id: i64) -> Result<Vec<Chapter>> {
    let book_exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM books WHERE id = ?")
        .bind(book_id)
        .fetch_one(pool)
        .await?;
    if !book_exists {
        return Err(CatalogError::not_found("book", book_id).into());
    }

    let rows = sqlx::query(
        "SELECT id, book_id, title, number FROM chapters WHERE book_id = ? \
         ORDER BY number IS NULL, number, id",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Chapter {
            id: row.get("id"),
            book_id: row.get("book_id"),
            title: row.get("title"),
            number: row.get("number"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[tokio::test]
    async fn test_unique_violation_maps_to_conflict() {
        let pool = memory_pool().await;
        let (source_id, _) = crate::test_support::seed_book(&pool).await;

        // Same row the existence check would have caught, inserted behind its back.
        let err = sqlx::query("INSERT INTO books (source_id, title, created_at) VALUES (?, ?, 0)")
            .bind(source_id)
            .bind("Purification")
            .execute(&pool)
            .await
            .unwrap_err();
        let err = unique_conflict(err, "book 'Purification' already exists".into());
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::Conflict(_))
        ));

        let err = sqlx::query("INSERT INTO no_such_table VALUES (1)")
            .execute(&pool)
            .await
            .unwrap_err();
        let err = unique_conflict(err, "unused".into());
        assert!(err.downcast_ref::<CatalogError>().is_none());
    }

    #[tokio::test]
    async fn test_source_book_chapter_hierarchy() {
        let pool = memory_pool().await;
        let source_id = create_source(
            &pool,
            &NewSource {
                name: "Sahih al-Bukhari".into(),
                author: Some("al-Bukhari".into()),
                description: None,
            },
        )
        .await
        .unwrap();

        let book_id = create_book(
            &pool,
            &NewBook {
                source_id,
                title: "Revelation".into(),
                number: Some(1),
            },
        )
        .await
        .unwrap();

        create_chapter(
            &pool,
            &NewChapter {
                book_id,
                title: "How the revelation began".into(),
                number: Some(1),
            },
        )
        .await
        .unwrap();

        let sources = list_sources(&pool).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].book_count, 1);

        let chapters = list_chapters(&pool, book_id).await.unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "How the revelation began");
    }

    #[tokio::test]
    async fn test_duplicate_source_is_conflict() {
        let pool = memory_pool().await;
        let input = NewSource {
            name: "Muwatta".into(),
            author: None,
            description: None,
        };
        create_source(&pool, &input).await.unwrap();
        let err = create_source(&pool, &input).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_book_under_missing_source() {
        let pool = memory_pool().await;
        let err = create_book(
            &pool,
            &NewBook {
                source_id: 42,
                title: "Faith".into(),
                number: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let pool = memory_pool().await;
        let err = create_chapter(
            &pool,
            &NewChapter {
                book_id: 1,
                title: "   ".into(),
                number: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CatalogError>(),
            Some(CatalogError::Invalid(_))
        ));
    }
}
