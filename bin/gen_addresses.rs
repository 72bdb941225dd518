//! # gen-addresses
//!
//! Derives the watched-address table from a newline-separated passphrase
//! list. Each passphrase yields one CSV row with the hex private key and all
//! five address encodings. Derivation is spread over worker threads; a
//! single writer owns the output file.

use anyhow::{Context, Result};
use clap::Parser;
use rbfbattle::address_table::save_rows;
use rbfbattle::config::chain_params;
use rbfbattle::keys::{derive, AddressRow};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gen-addresses")]
#[command(about = "Generate the watched-address CSV from a passphrase list")]
struct Cli {
    /// The file containing the passphrases to generate addresses for
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// The file to save the generated addresses to
    #[arg(short = 'o', long = "output", default_value = "addresses.csv")]
    output: PathBuf,

    /// The chain to generate addresses for
    #[arg(long = "chain", default_value = "mainnet")]
    chain: String,

    /// The number of worker threads to use
    #[arg(long = "workers")]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let network = chain_params(&cli.chain)?.network;

    let contents = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("cannot read passphrase file {}", cli.file.display()))?;
    let passphrases: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let total = passphrases.len();
    info!(total, "found passphrases");

    let workers = cli
        .workers
        .or_else(|| thread::available_parallelism().ok().map(NonZeroUsize::get))
        .unwrap_or(1)
        .max(1);
    let chunk_size = total.div_ceil(workers).max(1);
    let progress = AtomicU64::new(0);

    let (sender, receiver) = mpsc::channel::<AddressRow>();
    let rows = thread::scope(|scope| {
        for chunk in passphrases.chunks(chunk_size) {
            let sender = sender.clone();
            let progress = &progress;
            scope.spawn(move || {
                for passphrase in chunk {
                    match derive(passphrase, network) {
                        Ok(row) => {
                            if sender.send(row).is_err() {
                                return;
                            }
                        }
                        Err(err) => warn!(%err, "failed to derive addresses"),
                    }
                    let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % 1000 == 0 {
                        info!(done, total, "derivation progress");
                    }
                }
            });
        }
        drop(sender);

        receiver.iter().collect::<Vec<AddressRow>>()
    });

    save_rows(&cli.output, &rows)?;
    info!(
        rows = rows.len(),
        output = %cli.output.display(),
        "address table written"
    );
    Ok(())
}
