use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Opens the configured database and applies the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            author TEXT,
            description TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            number INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(source_id, title),
            FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            number INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hadiths (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            book_id INTEGER NOT NULL,
            chapter_id INTEGER,
            number INTEGER,
            text TEXT NOT NULL,
            text_normalized TEXT NOT NULL,
            translation TEXT,
            hadith_type TEXT NOT NULL CHECK (hadith_type IN ('marfu', 'mawquf', 'maqtu')),
            grade TEXT,
            text_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id),
            FOREIGN KEY (book_id) REFERENCES books(id),
            FOREIGN KEY (chapter_id) REFERENCES chapters(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS narrators (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            name_normalized TEXT NOT NULL,
            kunya TEXT,
            laqab TEXT,
            -- normalized kunya and laqab, newline-separated
            aliases_normalized TEXT NOT NULL DEFAULT '',
            tabaqa INTEGER,
            grade TEXT,
            bio TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS narrator_death_years (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            narrator_id INTEGER NOT NULL,
            year INTEGER NOT NULL,
            note TEXT,
            FOREIGN KEY (narrator_id) REFERENCES narrators(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hadith_narrators (
            hadith_id INTEGER NOT NULL,
            narrator_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            verb TEXT,
            PRIMARY KEY (hadith_id, position),
            FOREIGN KEY (hadith_id) REFERENCES hadiths(id) ON DELETE CASCADE,
            FOREIGN KEY (narrator_id) REFERENCES narrators(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS narrator_relations (
            teacher_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            count INTEGER NOT NULL CHECK (count > 0),
            PRIMARY KEY (teacher_id, student_id),
            FOREIGN KEY (teacher_id) REFERENCES narrators(id),
            FOREIGN KEY (student_id) REFERENCES narrators(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_books_source_id ON books(source_id)",
        "CREATE INDEX IF NOT EXISTS idx_chapters_book_id ON chapters(book_id)",
        "CREATE INDEX IF NOT EXISTS idx_hadiths_book_id ON hadiths(book_id)",
        "CREATE INDEX IF NOT EXISTS idx_hadiths_text_hash ON hadiths(book_id, text_hash)",
        "CREATE INDEX IF NOT EXISTS idx_narrators_name ON narrators(name_normalized)",
        "CREATE INDEX IF NOT EXISTS idx_hadith_narrators_narrator ON hadith_narrators(narrator_id, position)",
        "CREATE INDEX IF NOT EXISTS idx_relations_student ON narrator_relations(student_id)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
