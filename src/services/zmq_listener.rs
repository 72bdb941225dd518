//! # Mempool Notification Intake
//!
//! Subscribes to the node's ZMQ publisher and turns notifications into
//! decoded [`TxRecord`]s on the dispatch queue. `hashtx` bodies are 32-byte
//! txids resolved through `getrawtransaction`; `rawtx` bodies are serialized
//! transactions decoded by the node.
//!
//! The queue send blocks when the workers fall behind, which pushes the
//! backpressure onto the socket's high-water mark. A dropped notification is
//! one the agent could not have acted on in time anyway.

use crate::error::BattleResult;
use crate::services::node_client::NodeClient;
use crate::tx_record::TxRecord;
use bitcoin::Txid;
use crossbeam_channel::Sender;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run the subscribe loop. Only returns on a fatal transport error or when
/// every worker is gone.
pub fn run(endpoint: &str, node: Arc<NodeClient>, queue: Sender<TxRecord>) -> BattleResult<()> {
    let context = zmq::Context::new();
    let subscriber = context.socket(zmq::SUB)?;
    subscriber.connect(endpoint)?;
    subscriber.set_subscribe(b"hashtx")?;
    info!(endpoint, "subscribed to mempool notifications");

    loop {
        let frames = match subscriber.recv_multipart(0) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(%err, "error receiving notification");
                continue;
            }
        };
        if frames.len() < 2 {
            warn!(frames = frames.len(), "received incomplete notification");
            continue;
        }

        let record = match frames[0].as_slice() {
            b"hashtx" => {
                let txid_hex = hex::encode(&frames[1]);
                let txid = match Txid::from_str(&txid_hex) {
                    Ok(txid) => txid,
                    Err(err) => {
                        warn!(%err, body = %txid_hex, "notification carries no valid txid");
                        continue;
                    }
                };
                match node.raw_transaction(&txid) {
                    Ok(record) => record,
                    Err(err) => {
                        // Our own broadcasts notify before the transaction is
                        // queryable from the local mempool.
                        debug!(txid = %txid, %err, "could not fetch notified transaction");
                        continue;
                    }
                }
            }
            b"rawtx" => match node.decode_transaction(&frames[1]) {
                Ok(record) => record,
                Err(err) => {
                    warn!(%err, "could not decode raw transaction notification");
                    continue;
                }
            },
            topic => {
                warn!(topic = %String::from_utf8_lossy(topic), "received unknown notification topic");
                continue;
            }
        };

        if queue.send(record).is_err() {
            warn!("dispatch queue closed, stopping intake");
            return Ok(());
        }
    }
}
