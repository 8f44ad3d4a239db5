//! # Query Node CLI (`qnode`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qnode serve` | Start the HTTP query server |
//! | `qnode init` | Create the SQLite database and run schema migrations |
//! | `qnode collections` | List cached collections in the SQLite store |
//! | `qnode local --query <q>` | Run the local-content pipeline once and print JSON |
//! | `qnode completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! qnode init --config ./config/qnode.toml
//! qnode serve --config ./config/qnode.toml
//! qnode local --content "I use Python and Go" --query python
//! qnode local --file notes.md --query "deployment" --limit 5
//! ```

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;

use query_node::config::{self, Config};
use query_node::sqlite_store::SqliteStore;
use query_node::{logging, server};
use query_node_core::chunk::ParagraphChunker;
use query_node_core::gateway::{Decryptor, Registry};
use query_node_core::models::{FileRecord, LocalQueryRequest};
use query_node_core::store::memory::InMemoryStore;
use query_node_core::Resolver;

/// Private data query node: answers queries against encrypted registry files.
#[derive(Parser)]
#[command(name = "qnode", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qnode.toml")]
    config: PathBuf,

    /// Log at debug level unless QNODE_LOG or RUST_LOG say otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP query server.
    Serve,

    /// Initialize the SQLite collection store. Idempotent.
    Init,

    /// List collections cached in the SQLite store.
    Collections,

    /// Index content into a local collection and query it once.
    ///
    /// Runs against an in-memory store; the registry and decryption
    /// gateway are never contacted.
    Local {
        /// The query string.
        #[arg(long)]
        query: String,

        /// Content to index.
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        content: Option<String>,

        /// Read the content to index from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Local collection name.
        #[arg(long)]
        collection: Option<String>,

        /// Maximum number of fragments to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "qnode", &mut std::io::stdout());
        }
        Commands::Local {
            query,
            content,
            file,
            collection,
            limit,
        } => {
            let content = match (content, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("one of --content or --file is required"),
            };
            // The config is optional here; local runs only need the query
            // and chunking sections.
            let cfg = if cli.config.exists() {
                config::load_config(&cli.config)?
            } else {
                Config::local_only()
            };
            run_local(&cfg, content, query, collection, limit).await?;
        }
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Init => {
            let cfg = config::load_config(&cli.config)?;
            SqliteStore::open(&cfg.store.path).await?;
            println!(
                "Collection store initialized at {}",
                cfg.store.path.display()
            );
        }
        Commands::Collections => {
            let cfg = config::load_config(&cli.config)?;
            let store = SqliteStore::open(&cfg.store.path).await?;
            let stats = store.collection_stats().await?;
            if stats.is_empty() {
                println!("No collections.");
            }
            for stat in stats {
                let created = chrono::DateTime::from_timestamp(stat.created_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                println!("{:<72} {:>6} fragments  {}", stat.name, stat.fragments, created);
            }
        }
    }

    Ok(())
}

async fn run_local(
    cfg: &Config,
    content: String,
    query: String,
    collection: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let resolver = Resolver::new(
        Arc::new(Offline),
        Arc::new(Offline),
        Arc::new(InMemoryStore::new()),
        cfg.resolver_settings(),
    )
    .with_chunker(Arc::new(ParagraphChunker::new(cfg.chunking.max_tokens)));

    let request = LocalQueryRequest {
        content,
        query,
        collection,
        limit,
    };
    let response = resolver.query_local(&request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Stand-in upstream for `qnode local`, which never resolves registry files.
struct Offline;

#[async_trait::async_trait]
impl Registry for Offline {
    async fn resolve_file_id(&self, _url: &str) -> anyhow::Result<u64> {
        bail!("registry is not available in local mode")
    }

    async fn get_file(&self, _file_id: u64) -> anyhow::Result<Option<FileRecord>> {
        bail!("registry is not available in local mode")
    }

    async fn get_permission(&self, _file_id: u64, _grantee: &str) -> anyhow::Result<String> {
        bail!("registry is not available in local mode")
    }
}

#[async_trait::async_trait]
impl Decryptor for Offline {
    async fn decrypt(&self, _storage_locator: &str, _key: &str) -> anyhow::Result<Vec<u8>> {
        bail!("decryption gateway is not available in local mode")
    }
}
