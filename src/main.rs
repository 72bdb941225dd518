//! # rbfbattle
//!
//! Agent entry point. Startup is strict: a bad configuration, an unreachable
//! node, a missing address table, or a wallet without a usable funding
//! output all abort with a non-zero exit. Once running, the process serves
//! events until killed; per-event errors are logged and swallowed.

use anyhow::Result;
use crossbeam_channel::bounded;
use rbfbattle::address_table::AddressTable;
use rbfbattle::config::Config;
use rbfbattle::engine::{Engine, QUEUE_CAPACITY, WORKER_COUNT};
use rbfbattle::services::{zmq_listener, NodeApi, NodeClient};
use rbfbattle::tx_record::TxRecord;
use std::sync::Arc;
use tokio::task;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    info!(
        chain = %config.network,
        destination = %config.destination_address,
        "starting rbfbattle"
    );

    let node = Arc::new(NodeClient::connect(&config)?);

    let addresses = AddressTable::load(&config.address_file)?;
    let zmq_endpoint = config.zmq_endpoint.clone();
    let engine = Arc::new(Engine::new(
        config,
        Arc::clone(&node) as Arc<dyn NodeApi>,
        addresses,
    ));

    // Refuse to run without a confirmed output to fund replacements with.
    engine.funding_utxo()?;

    let (sender, receiver) = bounded::<TxRecord>(QUEUE_CAPACITY);
    for _ in 0..WORKER_COUNT {
        let engine = Arc::clone(&engine);
        let receiver = receiver.clone();
        task::spawn_blocking(move || {
            while let Ok(record) = receiver.recv() {
                engine.process_transaction(&record);
            }
        });
    }
    drop(receiver);

    let listener = task::spawn_blocking(move || zmq_listener::run(&zmq_endpoint, node, sender));
    listener.await??;
    Ok(())
}
