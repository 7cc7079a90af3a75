//! DriftKV CLI
//!
//! Inspect and edit a store directory from the command line.

use clap::{Parser, Subcommand};
use driftkv::storage::SegmentMode;
use driftkv::{Config, SegmentStore};
use tracing_subscriber::{fmt, EnvFilter};

/// DriftKV CLI
#[derive(Parser, Debug)]
#[command(name = "driftkv")]
#[command(about = "Inspect and edit a DriftKV store directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./driftkv_data")]
    data_dir: String,

    /// Segment size threshold in KB
    #[arg(short, long, default_value = "8")]
    segment_kb: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Run one compaction pass
    Compact,

    /// List segments
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,driftkv=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .segment_size_threshold(args.segment_kb * 1024)
        .disable_background_compaction()
        .build();

    let store = match SegmentStore::open(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = run(&store, args.command);
    let closed = store.close();

    if let Err(e) = outcome.and(closed) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(store: &SegmentStore, command: Commands) -> driftkv::Result<()> {
    match command {
        Commands::Get { key } => match store.get(&key)? {
            Some(value) => println!("{}", value),
            None => {
                println!("(not found)");
            }
        },
        Commands::Put { key, value } => {
            store.insert(&key, &value)?;
            println!("OK");
        }
        Commands::Compact => {
            let stats = store.compact()?;
            println!(
                "{} segments -> {}, {} records, {} bytes reclaimed in {:?}",
                stats.input_segments,
                stats.output_segments,
                stats.records_written,
                stats.bytes_reclaimed(),
                stats.elapsed
            );
        }
        Commands::Stats => {
            let stats = store.stats();
            for segment in &stats.segments {
                let mode = match segment.mode {
                    SegmentMode::Active => "active",
                    SegmentMode::Sealed(_) => "sealed",
                };
                println!(
                    "{:<14} {:<7} {:>10} bytes {:>8} keys",
                    segment.file_name, mode, segment.size, segment.keys
                );
            }
            println!(
                "{} segments, {} bytes",
                stats.segments.len(),
                stats.total_bytes()
            );
        }
    }

    Ok(())
}
