//! datapile CLI
//!
//! Command-line tool for creating, filling and querying data piles.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use datapile::{
    Attribute, Attributes, Checksum, Compression, Config, DataPile, Entry, OpenMode, PileError,
};
use tracing_subscriber::{fmt, EnvFilter};

/// datapile CLI
#[derive(Parser, Debug)]
#[command(name = "datapile")]
#[command(about = "Embedded data pile: chunked contents, attribute metadata and B+-tree indexes")]
#[command(version)]
struct Args {
    /// Base path of the pile (files are <path>.5dp, <path>.5dpm, <path>.5dpi)
    #[arg(short, long, default_value = "./datapile")]
    pile: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty pile
    Create,

    /// Add a file as a new entry
    Add {
        /// File whose bytes become the entry contents
        file: PathBuf,

        /// Indexed attribute, as name=value (repeatable)
        #[arg(short, long = "index", value_parser = parse_pair)]
        indexed: Vec<(String, String)>,

        /// Plain attribute, as name=value (repeatable)
        #[arg(short, long = "attr", value_parser = parse_pair)]
        attrs: Vec<(String, String)>,

        /// Chunk compression
        #[arg(short, long, value_enum, default_value = "none")]
        compression: CompressionArg,

        /// Chunk checksum
        #[arg(short = 's', long, value_enum, default_value = "none")]
        checksum: ChecksumArg,
    },

    /// Find entries by an indexed attribute
    Find {
        /// Attribute name
        name: String,

        /// Attribute value
        value: String,
    },

    /// Write an entry's contents to stdout
    Cat {
        /// Metadata offset of the entry (as printed by find/list)
        offset: u64,
    },

    /// List every entry
    List,

    /// Show sizes and indexes
    Info,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CompressionArg {
    None,
    Gzip,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ChecksumArg {
    None,
    Crc32,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))
}

fn main() {
    // Initialize tracing/logging (stderr, stdout carries entry contents)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,datapile=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("datapile v{}", datapile::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> datapile::Result<()> {
    match args.command {
        Commands::Create => {
            let pile = DataPile::create_path(&args.pile)?;
            pile.close()?;
            println!("created {}", args.pile.display());
        }

        Commands::Add {
            file,
            indexed,
            attrs,
            compression,
            checksum,
        } => {
            let config = Config::builder()
                .path(&args.pile)
                .compression(match compression {
                    CompressionArg::None => Compression::None,
                    CompressionArg::Gzip => Compression::Gzip,
                })
                .checksum(match checksum {
                    ChecksumArg::None => Checksum::None,
                    ChecksumArg::Crc32 => Checksum::Crc32,
                })
                .build()?;

            let attributes: Attributes = indexed
                .into_iter()
                .map(|(name, value)| Attribute::new(name, value, true))
                .chain(
                    attrs
                        .into_iter()
                        .map(|(name, value)| Attribute::new(name, value, false)),
                )
                .collect();
            let contents = fs::read(&file)?;

            let mut pile = DataPile::open(config)?;
            let entry = pile.add(&contents, attributes)?;
            pile.close()?;
            print_entry(&entry);
        }

        Commands::Find { name, value } => {
            let mut pile = open_read_only(&args.pile)?;
            let entries = pile.query(&name, &value)?;
            if entries.is_empty() {
                println!("no entries with {}={}", name, value);
            }
            for entry in &entries {
                print_entry(entry);
            }
        }

        Commands::Cat { offset } => {
            let mut pile = open_read_only(&args.pile)?;
            let entry = pile.entry(offset)?;
            let mut reader = pile.contents_reader(&entry);
            let mut stdout = io::stdout().lock();
            io::copy(&mut reader, &mut stdout)?;
            stdout.flush()?;
        }

        Commands::List => {
            let mut pile = open_read_only(&args.pile)?;
            for entry in pile.entries() {
                print_entry(&entry?);
            }
        }

        Commands::Info => {
            let pile = open_read_only(&args.pile)?;
            println!("pile:      {}", args.pile.display());
            println!("used:      {} bytes", pile.space_used());
            println!("available: {} bytes", pile.space_available());
            let names = pile.indexed_attributes();
            if names.is_empty() {
                println!("indexes:   (none)");
            } else {
                println!("indexes:   {}", names.join(", "));
            }
        }
    }
    Ok(())
}

fn open_read_only(path: &Path) -> Result<DataPile, PileError> {
    let config = Config::builder()
        .path(path)
        .mode(OpenMode::ReadOnly)
        .build()?;
    DataPile::open(config)
}

fn print_entry(entry: &Entry) {
    let attrs: Vec<String> = entry
        .attributes
        .iter()
        .map(|a| {
            let marker = if a.indexed { "*" } else { "" };
            format!("{}{}={}", a.name, marker, a.value)
        })
        .collect();
    println!(
        "@{:<10} {:>12} bytes  {}",
        entry.offset,
        entry.len(),
        attrs.join(" ")
    );
}
