//! # Lorekeeper CLI (`lore`)
//!
//! ```bash
//! lore --config ./config/lore.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lore init` | Create the SQLite database and run schema migrations |
//! | `lore convert <pdf-or-dir>...` | Convert PDFs to Markdown files |
//! | `lore index` | Scan, annotate, chunk and store the corpus |
//! | `lore search "<query>"` | Retrieve matching chunks |
//! | `lore ask "<question>"` | Answer a question with sources |
//! | `lore timeline` | Dated passages in chronological order |
//! | `lore get <id-or-path>` | Show a stored document |
//! | `lore stats` | Index overview |
//! | `lore embed pending` | Backfill missing or stale embeddings |
//! | `lore embed rebuild` | Delete and regenerate all embeddings |
//! | `lore serve mcp` | Start the HTTP server with the MCP endpoint |
//!
//! Logs go to stderr. `RUST_LOG` takes precedence over `-v`/`-vv`.

use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lorekeeper::convert::{self, ConvertEngine};
use lorekeeper::search::SearchMode;
use lorekeeper::{
    config, embed_cmd, get, ingest, llm, migrate, search, server, stats, timeline,
};

/// Lorekeeper: a local knowledge base for worldbuilding notes, with
/// heading-aware chunking and timeline queries.
#[derive(Parser)]
#[command(name = "lore", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lore.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Convert PDF files (or directories of PDFs) to Markdown.
    Convert {
        /// PDF files or directories.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory for the Markdown files.
        #[arg(long, default_value = "./md_out")]
        out: PathBuf,

        /// `plain` text or `structured` (headings and bullets recovered).
        #[arg(long, default_value = "structured")]
        engine: ConvertEngine,

        /// Only look at the top level of input directories.
        #[arg(long)]
        no_recursive: bool,

        /// Replace Markdown files that already exist.
        #[arg(long)]
        overwrite: bool,
    },

    /// Build or update the index from the filesystem connector.
    Index {
        /// Ignore the checkpoint and reindex every file.
        #[arg(long)]
        full: bool,

        /// Report what would be indexed without writing.
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Retrieve the chunks most relevant to a query.
    Search {
        query: String,

        /// keyword, semantic or hybrid.
        #[arg(long, default_value = "keyword")]
        mode: SearchMode,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question from the knowledge base.
    Ask {
        question: String,

        /// Chunks of context passed to the model.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List dated passages in chronological order.
    Timeline {
        /// Inclusive lower year bound.
        #[arg(long, allow_negative_numbers = true)]
        start: Option<i64>,

        /// Inclusive upper year bound.
        #[arg(long, allow_negative_numbers = true)]
        end: Option<i64>,

        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,

        #[arg(long)]
        json: bool,
    },

    /// Show a stored document by id or source path.
    Get {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Index overview.
    Stats,

    /// Manage chunk embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Serve the REST API and the MCP endpoint (`/mcp`) on `[server] bind`.
    Mcp,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or stale.
    Pending {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Conversion works on loose files and needs no config.
    if let Commands::Convert {
        inputs,
        out,
        engine,
        no_recursive,
        overwrite,
    } = &cli.command
    {
        return convert::run_convert(inputs, out, *engine, !no_recursive, *overwrite);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Convert { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Index {
            full,
            dry_run,
            limit,
        } => {
            ingest::run_index(&cfg, full, dry_run, limit).await?;
        }
        Commands::Search { query, mode, limit } => {
            search::run_search(&cfg, &query, mode, limit).await?;
        }
        Commands::Ask { question, top_k } => {
            llm::run_ask(&cfg, &question, top_k).await?;
        }
        Commands::Timeline {
            start,
            end,
            limit,
            json,
        } => {
            timeline::run_timeline(&cfg, start, end, limit.map(|l| l as usize), json).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
