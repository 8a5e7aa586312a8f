//! # Isnad Catalog CLI (`isnad`)
//!
//! The `isnad` binary manages a hadith and narrator catalogue: database
//! setup, bulk import, browsing, fuzzy narrator search, isnad analysis,
//! musnad export, and the REST server.
//!
//! ## Usage
//!
//! ```bash
//! isnad --config ./config/isnad.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `isnad init` | Create the SQLite database and schema |
//! | `isnad serve` | Start the REST API server |
//! | `isnad stats` | Print catalogue counts |
//! | `isnad hadiths` | List hadiths with filters |
//! | `isnad hadith <id>` | Show one hadith with its chain |
//! | `isnad narrators` | List narrators |
//! | `isnad narrator <id>` | Show a narrator with teachers and students |
//! | `isnad search-narrator <name>` | Fuzzy narrator search |
//! | `isnad import <file>` | Import hadith batches from JSON |
//! | `isnad analyze <text>` | Extract narrators from isnad text |
//! | `isnad export <id>` | Export a narrator's musnad |
//! | `isnad relations rebuild` | Recompute teacher/student counts |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use isnad_catalog::hadiths::HadithFilter;
use isnad_catalog::models::HadithType;
use isnad_catalog::pagination::PageRequest;
use isnad_catalog::{commands, config, export, import, migrate, server, stats};

/// Isnad Catalog CLI: hadith collections, narrators and their chains of
/// transmission.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/isnad.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "isnad",
    about = "Isnad Catalog: hadith collections, narrators and chains of transmission",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/isnad.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Idempotent.
    Init,

    /// Start the REST API server on `[server].bind`.
    Serve,

    /// Print catalogue counts.
    Stats,

    /// List hadiths.
    Hadiths {
        /// Text search over the normalized Arabic text and the translation.
        #[arg(long)]
        q: Option<String>,

        /// Source id.
        #[arg(long)]
        source: Option<i64>,

        /// Book id.
        #[arg(long)]
        book: Option<i64>,

        /// Chapter id.
        #[arg(long)]
        chapter: Option<i64>,

        /// Attribution level: `marfu`, `mawquf`, or `maqtu`.
        #[arg(long = "type")]
        hadith_type: Option<HadithType>,

        /// Narrator id appearing anywhere in the chain.
        #[arg(long)]
        narrator: Option<i64>,

        #[arg(long)]
        page: Option<i64>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show one hadith with its chain.
    Hadith { id: i64 },

    /// List narrators.
    Narrators {
        /// Matches name, kunya or laqab.
        #[arg(long)]
        q: Option<String>,

        #[arg(long)]
        tabaqa: Option<i64>,

        #[arg(long)]
        page: Option<i64>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Show a narrator with death years, teachers and students.
    Narrator { id: i64 },

    /// Fuzzy search for a narrator by name.
    SearchNarrator {
        name: String,

        /// Maximum number of candidates (defaults to `[matching].max_candidates`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Import hadith batches from a JSON file.
    ///
    /// The file holds one batch object or an array of them. Hadiths whose
    /// text already exists in the same book are skipped.
    Import { file: PathBuf },

    /// Extract the narrators of an isnad.
    ///
    /// Uses the LLM backend from `[llm]`, or the rule-based parser when
    /// the provider is `disabled`.
    Analyze {
        text: String,

        /// Attach stored-narrator candidates to every extracted name.
        #[arg(long = "match")]
        with_matches: bool,
    },

    /// Export a narrator's musnad.
    Export {
        /// Narrator id.
        id: i64,

        /// `json`, `markdown`, or `docx`.
        #[arg(long, default_value = "markdown")]
        format: export::ExportFormat,

        /// Output file. Required for `docx`; text formats default to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Maintain the teacher/student relation table.
    Relations {
        #[command(subcommand)]
        action: RelationsAction,
    },
}

#[derive(Subcommand)]
enum RelationsAction {
    /// Drop and recompute every relation from the stored chains.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Hadiths {
            q,
            source,
            book,
            chapter,
            hadith_type,
            narrator,
            page,
            limit,
        } => {
            let filter = HadithFilter {
                q,
                source_id: source,
                book_id: book,
                chapter_id: chapter,
                hadith_type,
                narrator_id: narrator,
                first_narrator_id: None,
            };
            commands::run_hadiths(&cfg, &filter, PageRequest::new(page, limit)).await?;
        }
        Commands::Hadith { id } => {
            commands::run_hadith(&cfg, id).await?;
        }
        Commands::Narrators {
            q,
            tabaqa,
            page,
            limit,
        } => {
            commands::run_narrators(&cfg, q.as_deref(), tabaqa, PageRequest::new(page, limit))
                .await?;
        }
        Commands::Narrator { id } => {
            commands::run_narrator(&cfg, id).await?;
        }
        Commands::SearchNarrator { name, limit } => {
            commands::run_search_narrator(&cfg, &name, limit).await?;
        }
        Commands::Import { file } => {
            import::run_import(&cfg, &file).await?;
        }
        Commands::Analyze { text, with_matches } => {
            commands::run_analyze(&cfg, &text, with_matches).await?;
        }
        Commands::Export { id, format, output } => {
            export::run_export(&cfg, id, format, output.as_deref()).await?;
        }
        Commands::Relations { action } => match action {
            RelationsAction::Rebuild => {
                commands::run_rebuild_relations(&cfg).await?;
            }
        },
    }

    Ok(())
}
