//! # Isnad Catalog
//!
//! A catalogue of hadith collections, their narrators, and the chains of
//! transmission (isnad) that connect them.
//!
//! Hadiths are filed under source → book → chapter. Every hadith carries an
//! ordered chain of narrators; position 1 is the companion who heard the
//! Prophet. Adjacent chain positions feed a teacher/student graph, which in
//! turn powers narrator pages, musnad views and exports.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Import / API │──▶│ hadiths +    │──▶│  SQLite   │
//! │   writes     │   │ relations    │   │          │
//! └──────────────┘   └──────────────┘   └────┬─────┘
//!                                            │
//!   isnad text ──▶ extractor ──▶ matching ───┤
//!                 (rules / LLM)              │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                 ┌──────────┐         ┌──────────┐
//!                 │   CLI    │         │   HTTP   │
//!                 │ (isnad)  │         │  (REST)  │
//!                 └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! isnad init                          # create database
//! isnad import bukhari-book1.json     # load a batch of hadiths
//! isnad analyze "حدثنا الحميدي قال حدثنا سفيان" --match
//! isnad export 12 --format docx --output musnad.docx
//! isnad serve                         # start the REST API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`sources`] | Sources, books, chapters |
//! | [`hadiths`] | Hadith storage and filtered listing |
//! | [`narrators`] | Narrator records and musnad |
//! | [`relations`] | Teacher/student counts |
//! | [`arabic`] | Text normalization |
//! | [`isnad`] | Rule-based isnad parser |
//! | [`llm`] | Isnad extraction backends |
//! | [`matching`] | Fuzzy narrator matching |
//! | [`export`] | JSON / Markdown / Word export |
//! | [`server`] | REST API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod arabic;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod hadiths;
pub mod import;
pub mod isnad;
pub mod llm;
pub mod matching;
pub mod migrate;
pub mod models;
pub mod narrators;
pub mod pagination;
pub mod relations;
pub mod server;
pub mod sources;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
    use std::str::FromStr;

    use crate::models::{
        HadithBody, HadithType, NewBook, NewChainLink, NewHadith, NewNarrator, NewSource,
    };

    /// A fresh in-memory database with the full schema.
    ///
    /// One connection only: every `sqlite::memory:` connection is its own
    /// database.
    pub async fn memory_pool() -> SqlitePool {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        pool
    }

    /// One source with one book; returns `(source_id, book_id)`.
    pub async fn seed_book(pool: &SqlitePool) -> (i64, i64) {
        let source_id = crate::sources::create_source(
            pool,
            &NewSource {
                name: "Sunan".into(),
                author: None,
                description: None,
            },
        )
        .await
        .unwrap();
        let book_id = crate::sources::create_book(
            pool,
            &NewBook {
                source_id,
                title: "Purification".into(),
                number: Some(1),
            },
        )
        .await
        .unwrap();
        (source_id, book_id)
    }

    pub async fn seed_narrators(pool: &SqlitePool, names: &[&str]) -> Vec<i64> {
        let mut ids = Vec::new();
        for name in names {
            let id = crate::narrators::create_narrator(
                pool,
                &NewNarrator {
                    name: name.to_string(),
                    kunya: None,
                    laqab: None,
                    tabaqa: None,
                    grade: None,
                    bio: None,
                    death_years: vec![],
                },
            )
            .await
            .unwrap();
            ids.push(id);
        }
        ids
    }

    /// A marfu hadith in `book` whose chain is `chain` in storage order.
    pub fn new_hadith(source_id: i64, book_id: i64, text: &str, chain: &[i64]) -> NewHadith {
        NewHadith {
            source_id,
            book_id,
            body: HadithBody {
                chapter_id: None,
                number: None,
                text: text.into(),
                translation: None,
                hadith_type: HadithType::Marfu,
                grade: None,
                chain: chain
                    .iter()
                    .map(|id| NewChainLink {
                        narrator_id: *id,
                        position: None,
                        verb: None,
                    })
                    .collect(),
            },
        }
    }
}
