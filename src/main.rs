mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemos::config::MnemosConfig;
use mnemos::engine::MemoryEngine;
use mnemos::memory::types::ItemRef;

#[derive(Parser)]
#[command(name = "mnemos", version, about = "Persistent memory for AI coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store an item given as JSON, e.g. '{"type":"decision","title":"..","description":".."}'
    Store {
        json: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Fetch an item and record the access
    Get { kind: String, id: String },
    /// Archive (soft-delete) an item
    Archive { kind: String, id: String },
    /// Hybrid BM25 + vector search
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Skip the vector leg
        #[arg(long)]
        lexical: bool,
    },
    /// Items associated with files or seed items
    Related {
        #[arg(long = "file")]
        files: Vec<String>,
        /// Seed item as kind:id
        #[arg(long = "seed")]
        seeds: Vec<ItemRef>,
    },
    /// Run one decay sweep and archival pruning
    Maintain {
        #[arg(long)]
        tables: Option<usize>,
    },
    /// Session boundaries
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Store statistics
    Stats,
    /// Database diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Start a session; a new id is generated when none is given
    Start {
        id: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    End {
        id: String,
        #[arg(long)]
        summary: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MnemosConfig::load()?;

    // Log to stderr so stdout carries only JSON output
    let filter =
        EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Command::Doctor = cli.command {
        return cli::doctor::doctor(&config);
    }

    let engine = MemoryEngine::open(config)?;
    match cli.command {
        Command::Store { json, session } => {
            cli::store(&engine, &json, session.as_deref()).await?;
        }
        Command::Get { kind, id } => cli::get(&engine, &cli::item_ref(&kind, &id)?)?,
        Command::Archive { kind, id } => cli::archive(&engine, &cli::item_ref(&kind, &id)?)?,
        Command::Search {
            query,
            limit,
            lexical,
        } => cli::search::search(&engine, &query, limit, lexical)?,
        Command::Related { files, seeds } => cli::search::related(&engine, files, seeds)?,
        Command::Maintain { tables } => cli::maintenance::maintain(&engine, tables)?,
        Command::Session { action } => match action {
            SessionAction::Start { id, project } => {
                let id = id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
                cli::maintenance::session_start(&engine, &id, project.as_deref())?
            }
            SessionAction::End { id, summary } => {
                cli::maintenance::session_end(&engine, &id, summary.as_deref())?
            }
        },
        Command::Stats => cli::stats::stats(&engine)?,
        Command::Doctor => {}
    }

    Ok(())
}
