//! Decoded transaction records as delivered to the classification pipeline.
//!
//! Both notification paths end up here: `hashtx` bodies are resolved through
//! `getrawtransaction verbose=true`, `rawtx` bodies through
//! `decoderawtransaction`. The two RPC results carry the same transaction
//! fields; only the verbose form knows about confirmations.

use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Txid};
use bitcoincore_rpc::json::{
    DecodeRawTransactionResult, GetRawTransactionResult, GetRawTransactionResultVin,
    GetRawTransactionResultVout,
};

/// One output of a decoded transaction.
#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub n: u32,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    /// Address string, when the script encodes one.
    pub address: Option<String>,
}

/// A decoded transaction as seen by the workers.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub txid: Txid,
    pub confirmations: u32,
    pub block_hash: Option<BlockHash>,
    /// Previous outputs spent by this transaction. Coinbase inputs are
    /// dropped here; they can never touch a monitored output.
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<OutputRecord>,
}

impl TxRecord {
    pub fn from_verbose(tx: &GetRawTransactionResult) -> TxRecord {
        TxRecord {
            txid: tx.txid,
            confirmations: tx.confirmations.unwrap_or(0),
            block_hash: tx.blockhash,
            inputs: convert_inputs(&tx.vin),
            outputs: convert_outputs(&tx.vout),
        }
    }

    pub fn from_decoded(tx: &DecodeRawTransactionResult) -> TxRecord {
        TxRecord {
            txid: tx.txid,
            confirmations: 0,
            block_hash: None,
            inputs: convert_inputs(&tx.vin),
            outputs: convert_outputs(&tx.vout),
        }
    }
}

fn convert_inputs(vin: &[GetRawTransactionResultVin]) -> Vec<OutPoint> {
    vin.iter()
        .filter_map(|input| match (input.txid, input.vout) {
            (Some(txid), Some(vout)) => Some(OutPoint::new(txid, vout)),
            _ => None,
        })
        .collect()
}

fn convert_outputs(vout: &[GetRawTransactionResultVout]) -> Vec<OutputRecord> {
    vout.iter()
        .map(|output| OutputRecord {
            n: output.n,
            value: output.value,
            script_pubkey: ScriptBuf::from(output.script_pub_key.hex.clone()),
            address: output
                .script_pub_key
                .address
                .clone()
                .map(|address| address.assume_checked().to_string()),
        })
        .collect()
}
