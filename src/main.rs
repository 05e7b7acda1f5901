// ABOUTME: Entry point for the wsjournal admin binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs one command against a collection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use wsjournal_store::{StorageManager, StoreConfig};

#[derive(Parser)]
#[command(
    name = "wsjournal",
    version,
    about = "Inspect and maintain journaled key/value collections"
)]
struct Cli {
    /// Base directory holding the collections (overrides WSJOURNAL_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List collections under the base directory
    List,
    /// Print the number of keys in a collection
    Count { name: String },
    /// Print the keys of a collection as a JSON array
    Keys {
        name: String,
        #[arg(long, default_value_t = 0)]
        from: usize,
        #[arg(long)]
        to: Option<usize>,
    },
    /// Print the value stored under a key
    Get { name: String, key: String },
    /// Create or replace a key
    Push {
        name: String,
        key: String,
        value: String,
    },
    /// Update an existing key
    Set {
        name: String,
        key: String,
        value: String,
    },
    /// Remove a key and print its value
    Pop { name: String, key: String },
    /// Snapshot a collection and empty its journal
    Compact { name: String },
    /// Replay a collection and report on its journal
    Check { name: String },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wsjournal=info,wsjournal_store=info"
                    .parse()
                    .unwrap_or_default()
            }),
        )
        .init();

    let cli = Cli::parse();

    let mut config = StoreConfig::from_env()?;
    if let Some(home) = cli.home {
        config.home = home;
    }
    let manager = StorageManager::from_config(&config)
        .with_context(|| format!("cannot use data directory {}", config.home.display()))?;
    tracing::info!("using data directory {}", manager.home().display());

    match cli.command {
        Commands::List => {
            for name in manager.list_collections()? {
                println!("{}", name);
            }
        }

        Commands::Count { name } => {
            let collection = manager.open(&name)?;
            println!("{}", collection.count());
        }

        Commands::Keys { name, from, to } => {
            let collection = manager.open(&name)?;
            let keys = match to {
                Some(to) => collection.keys_range(from, to),
                None => collection.keys_range(from, usize::MAX),
            };
            println!("{}", serde_json::to_string_pretty(&keys)?);
        }

        Commands::Get { name, key } => {
            let collection = manager.open(&name)?;
            println!("{}", collection.get(&key)?);
        }

        Commands::Push { name, key, value } => {
            let mut collection = manager.open(&name)?;
            collection.push(&key, value)?;
            collection.close()?;
        }

        Commands::Set { name, key, value } => {
            let mut collection = manager.open(&name)?;
            collection.set(&key, value)?;
            collection.close()?;
        }

        Commands::Pop { name, key } => {
            let mut collection = manager.open(&name)?;
            let value = collection.pop(&key)?;
            collection.close()?;
            println!("{}", value);
        }

        Commands::Compact { name } => {
            let mut collection = manager.open(&name)?;
            let stats = collection.snapshot()?;
            collection.close()?;
            println!(
                "compacted {}: {} keys at seq {}, {} records ({} bytes) folded into the snapshot",
                name, stats.keys, stats.last_seq, stats.records_compacted, stats.bytes_reclaimed
            );
        }

        Commands::Check { name } => {
            let collection = manager.open(&name)?;
            let report = collection.replay_report();
            let summary = serde_json::json!({
                "collection": name,
                "keys": collection.count(),
                "journal_bytes": collection.journal_len(),
                "lines": report.lines,
                "applied": report.applied,
                "covered_by_snapshot": report.covered_by_snapshot,
                "corrupt_lines": report.corrupt_lines,
                "torn_tail": report.torn_tail,
                "from_snapshot": report.from_snapshot,
                "last_seq": report.last_seq,
                "last_timestamp": report.last_timestamp.map(|ts| ts.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
