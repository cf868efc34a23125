//! shelfdb CLI
//!
//! Command-line tools for shelfdb store directories.
//!
//! # Commands
//!
//! - `inspect` - List resource files with object counts and sizes
//! - `dump` - Print the content of one resource as JSON
//! - `verify` - Check a fragmented class against its fragment index

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use shelfdb_core::{CodecKind, Config, Store, DEFAULT_FRAGMENT_SIZE};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// shelfdb command-line store tools.
#[derive(Parser)]
#[command(name = "shelfdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Codec the store files were written with
    #[arg(global = true, short, long, value_enum, default_value_t = Format::Cbor)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Cbor,
    Json,
}

impl From<Format> for CodecKind {
    fn from(format: Format) -> Self {
        match format {
            Format::Cbor => CodecKind::Cbor,
            Format::Json => CodecKind::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List resource files with object counts and sizes
    Inspect {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the objects of one resource as JSON
    Dump {
        /// Resource id, e.g. `Planet` or `Moon/Moon-luna`
        resource: String,
    },

    /// Check a fragmented class against its fragment index
    Verify {
        /// Class name
        class: String,

        /// Fragment capacity the store was written with
        #[arg(long, default_value_t = DEFAULT_FRAGMENT_SIZE)]
        fragment_size: usize,
    },

    /// Show version information
    Version,
}

fn open_store(path: Option<&Path>, format: Format, fragment_size: usize) -> Result<Store, Box<dyn std::error::Error>> {
    let path = path.ok_or("Store path required (--path)")?;
    let config = Config::default()
        .create_if_missing(false)
        .codec(format.into())
        .fragment_size(fragment_size);
    debug!(path = %path.display(), "opening store");
    Ok(Store::open(path, config)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { json } => {
            let store = open_store(cli.path.as_deref(), cli.format, DEFAULT_FRAGMENT_SIZE)?;
            commands::inspect::run(&store, json)?;
        }
        Commands::Dump { resource } => {
            let store = open_store(cli.path.as_deref(), cli.format, DEFAULT_FRAGMENT_SIZE)?;
            commands::dump::run(&store, &resource)?;
        }
        Commands::Verify {
            class,
            fragment_size,
        } => {
            let store = open_store(cli.path.as_deref(), cli.format, fragment_size)?;
            commands::verify::run(&store, &class)?;
        }
        Commands::Version => {
            println!("shelfdb CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
