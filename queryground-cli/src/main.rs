use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use queryground_core::{
    compact, set_log_level, Limits, LogLevel, MemoryEngine, Page, Sandbox,
};
use serde_json::json;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "queryground")]
#[command(about = "queryground CLI - run queries against ephemeral sample databases")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dataset from a config file and run a query against it
    Run {
        /// Configuration file (array of documents or db={...})
        config: PathBuf,
        /// Query statement, e.g. db.collection.find({k:1})
        query: String,
        /// Also print the page id and database hash
        #[arg(long)]
        verbose: bool,
        /// Print cache statistics on stderr after the run
        #[arg(long)]
        stats: bool,
    },
    /// Print the compacted form of a config or query file
    Compact {
        /// File to compact
        file: PathBuf,
    },
    /// Print the identifiers derived from a (config, query) pair
    Id {
        /// Configuration file
        config: PathBuf,
        /// Query statement
        query: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = LogLevel::parse(&cli.log_level)
        .ok_or_else(|| anyhow::anyhow!("unknown log level: {}", cli.log_level))?;
    set_log_level(level);

    match cli.command {
        Commands::Run {
            config,
            query,
            verbose,
            stats,
        } => run_query(&config, &query, verbose, stats),
        Commands::Compact { file } => {
            let content = fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let out = compact(&content);
            println!("{}", String::from_utf8_lossy(&out));
            Ok(())
        }
        Commands::Id { config, query } => {
            let page = load_page(&config, &query)?;
            let ids = json!({
                "id": page.id(),
                "db_hash": page.db_hash(),
                "label": page.label(),
            });
            println!("{}", serde_json::to_string_pretty(&ids)?);
            Ok(())
        }
    }
}

fn load_page(config: &PathBuf, query: &str) -> Result<Page> {
    let config = fs::read(config)
        .with_context(|| format!("failed to read {}", config.display()))?;
    Page::new("json", &config, query.as_bytes(), &Limits::default())
        .map_err(anyhow::Error::from)
}

fn run_query(config: &PathBuf, query: &str, verbose: bool, stats: bool) -> Result<()> {
    let page = load_page(config, query)?;
    if verbose {
        eprintln!("page id: {}", page.id());
        eprintln!("db hash: {}", page.db_hash());
    }

    let sandbox = Sandbox::new(MemoryEngine::new());
    // query and config errors are the product here, print them on
    // stdout like the playground does instead of failing
    match sandbox.run(&page) {
        Ok(result) => println!("{}", result),
        Err(err) => println!("{}", err),
    }
    if stats {
        eprintln!("{}", serde_json::to_string(&sandbox.stats())?);
    }
    Ok(())
}
