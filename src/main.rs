//! salesboard CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use salesboard::{
    commands::{
        cmd_clear, cmd_fetch, cmd_gc, cmd_ingest, cmd_init, cmd_product, cmd_products,
        cmd_status, cmd_watch, open_session, print_clear_result, print_fetch_result,
        print_gc_stats, print_ingest_stats, print_init_result, print_product_detail,
        print_products, print_status, IngestOptions, InitOptions,
    },
    config::Config,
    error::{Error, Result},
    report::{ProductQuery, SortKey},
};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "salesboard")]
#[command(version, about = "Merge daily sales exports and share them through a document store", long_about = None)]
struct Cli {
    /// Path to config file or data directory
    #[arg(short, long, global = true, env = "SALESBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize salesboard configuration and snapshot cache
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,

        /// Author id recorded on publishes (generated if omitted)
        #[arg(long)]
        author: Option<String>,

        /// Store backend: fs, http or memory
        #[arg(long)]
        backend: Option<String>,

        /// Base URL of the http store
        #[arg(long)]
        url: Option<String>,
    },

    /// Merge export files into the shared snapshot and publish it
    Ingest {
        /// Export files or directories of .json/.jsonl exports
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Merge and report without publishing
        #[arg(long)]
        dry_run: bool,

        /// Fail instead of overwriting if someone else published meanwhile
        #[arg(long)]
        fail_on_conflict: bool,
    },

    /// Download the latest snapshot and show the dashboard
    Fetch,

    /// Poll for new snapshots until interrupted
    Watch,

    /// List products
    Products {
        /// Filter by name or product id (case-insensitive)
        #[arg(short, long)]
        search: Option<String>,

        /// Only products that were renamed
        #[arg(long)]
        name_changed: bool,

        /// Sort by: revenue, views, units, conversion, names, name
        #[arg(long, default_value = "revenue")]
        sort: String,

        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,

        /// Maximum number of products
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show name history and per-name performance for a product
    Product {
        /// Product id
        product_id: String,
    },

    /// Publish an empty snapshot, discarding all merged data
    Clear {
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Delete chunks of superseded snapshots
    Gc,

    /// Show system status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (json_layer, text_layer) = if cli.log_json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().with_writer(std::io::stderr)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    // Handle completions command (doesn't need config or store)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "salesboard", &mut std::io::stdout());
        return Ok(());
    }

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init {
        force,
        author,
        backend,
        url,
    } = cli.command
    {
        let options = InitOptions {
            base_dir: init_base_dir(cli.config.as_deref()),
            force,
            author_id: author,
            backend,
            store_url: url,
        };
        let result = cmd_init(options).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print_init_result(&result);
        }
        return Ok(());
    }

    // Load configuration
    let config = load_config(cli.config.as_deref())?;

    // Status reports store problems instead of failing on them
    if let Commands::Status = cli.command {
        let status = cmd_status(&config).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            print_status(&status);
        }
        return Ok(());
    }

    let session = open_session(&config).await?;

    // Handle commands
    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } | Commands::Status => unreachable!(),

        Commands::Ingest {
            paths,
            dry_run,
            fail_on_conflict,
        } => {
            let options = IngestOptions {
                dry_run,
                fail_on_conflict,
            };
            let stats = cmd_ingest(&config, &session, &paths, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_ingest_stats(&stats);
            }
        }

        Commands::Fetch => {
            let result = cmd_fetch(&config, &session).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_fetch_result(&result);
            }
        }

        Commands::Watch => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            let stats = cmd_watch(&config, &session, shutdown, cli.json).await?;
            info!(
                polls = stats.polls,
                applied = stats.applied,
                failures = stats.failures,
                "Watch finished"
            );
        }

        Commands::Products {
            search,
            name_changed,
            sort,
            asc,
            limit,
        } => {
            let query = ProductQuery {
                search,
                name_changed_only: name_changed,
                sort: sort.parse::<SortKey>()?,
                ascending: asc,
                limit,
            };
            let list = cmd_products(&config, &session, &query).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                print_products(&list);
            }
        }

        Commands::Product { product_id } => {
            let detail = cmd_product(&config, &session, &product_id).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                print_product_detail(&detail);
            }
        }

        Commands::Clear { yes } => {
            if !yes && !confirm("Publish an empty snapshot for every reader?")? {
                println!("Aborted.");
                return Ok(());
            }
            let summary = cmd_clear(&config, &session).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_clear_result(&summary);
            }
        }

        Commands::Gc => {
            let stats = cmd_gc(&session).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_gc_stats(&stats);
            }
        }
    }

    session.disconnect().await?;
    Ok(())
}

/// Base directory for init: the parent of a .toml path, a directory, or the default
fn init_base_dir(path: Option<&Path>) -> PathBuf {
    match path {
        Some(p) if p.extension().map_or(false, |e| e == "toml") => p
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir),
        Some(p) => p.to_path_buf(),
        None => Config::default_base_dir(),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(p) if p.extension().map_or(false, |e| e == "toml") => p.to_path_buf(),
        Some(p) => p.join("config.toml"),
        None => Config::default_config_path(),
    };

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::{self, BufRead, Write};

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
