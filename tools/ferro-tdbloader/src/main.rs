//! Ferro TDB Loader
//!
//! Bulk loads N-Triples files into a ferro-tdb dataset and offers a few
//! inspection commands over the result.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tdbloader")]
#[command(version, about = "Bulk loader and inspection tool for ferro-tdb datasets")]
struct Cli {
    /// Dataset directory
    #[arg(long, global = true, default_value = "DB")]
    loc: PathBuf,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Triples held in memory before a sorted run is spilled to disk
    #[arg(long, global = true)]
    mem_buffer: Option<usize>,

    /// Triples translated to ids per batch
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bulk load N-Triples files ("-" reads stdin)
    Load {
        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Parse N-Triples files without loading them
    Parse {
        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show dataset statistics
    Info,
    /// Print the triples matching a pattern as N-Triples
    Find {
        /// Subject, in N-Triples syntax
        #[arg(long = "s")]
        subject: Option<String>,
        /// Predicate, in N-Triples syntax
        #[arg(long = "p")]
        predicate: Option<String>,
        /// Object, in N-Triples syntax
        #[arg(long = "o")]
        object: Option<String>,
        /// Stop after this many triples
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = commands::store_config(&cli.loc, cli.mem_buffer, cli.batch_size)?;
    match cli.command {
        Command::Load { files } => commands::load(config, &files),
        Command::Parse { files } => commands::parse(&files),
        Command::Info => commands::info(config),
        Command::Find {
            subject,
            predicate,
            object,
            limit,
        } => commands::find(
            config,
            subject.as_deref(),
            predicate.as_deref(),
            object.as_deref(),
            limit,
        ),
    }
}
