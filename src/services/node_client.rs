//! # Node RPC Client
//!
//! Wraps `bitcoincore_rpc::Client` behind the small surface the engine
//! needs. The engine-facing part is the [`NodeApi`] trait so tests can run
//! against an in-memory node.

use crate::config::Config;
use crate::engine::funding::FundingUtxo;
use crate::error::{BattleError, BattleResult};
use crate::signer::PrevOutFetcher;
use crate::tx_record::TxRecord;
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxOut, Txid};
use bitcoincore_rpc::json::EstimateMode;
use bitcoincore_rpc::{Client, RpcApi};
use std::sync::Arc;
use tracing::info;

/// Fee and size of a competitor's mempool entry.
#[derive(Debug, Clone, Copy)]
pub struct MempoolEntry {
    pub vsize: u64,
    /// Fee of the entry and all its descendants; what a replacement has to
    /// outbid.
    pub descendant_fee: Amount,
}

/// The node operations the engine depends on.
pub trait NodeApi: Send + Sync {
    fn block_count(&self) -> BattleResult<u64>;

    /// Conservative 1-block fee estimate in sat/vbyte, when the node has one.
    fn smart_fee_rate(&self) -> BattleResult<Option<f64>>;

    fn mempool_entry(&self, txid: &Txid) -> BattleResult<MempoolEntry>;

    /// Confirmed wallet outputs (minimum one confirmation).
    fn list_unspent_confirmed(&self) -> BattleResult<Vec<FundingUtxo>>;

    /// Have the node wallet sign whatever inputs it can; returns the
    /// (possibly still incomplete) transaction.
    fn sign_with_wallet(&self, tx: &Transaction) -> BattleResult<Transaction>;

    fn broadcast(&self, tx: &Transaction) -> BattleResult<Txid>;

    /// Value and script of an arbitrary output, for taproot sighashes.
    fn prev_out(&self, outpoint: &OutPoint) -> BattleResult<TxOut>;
}

impl PrevOutFetcher for Arc<dyn NodeApi> {
    fn prev_out(&self, outpoint: &OutPoint) -> BattleResult<TxOut> {
        NodeApi::prev_out(self.as_ref(), outpoint)
    }
}

/// RPC-backed implementation of [`NodeApi`].
pub struct NodeClient {
    client: Client,
}

impl NodeClient {
    /// Connect and probe the node with a `getblockcount`.
    pub fn connect(config: &Config) -> BattleResult<NodeClient> {
        let client = Client::new(&config.rpc_url, config.rpc_auth.clone())?;
        let node = NodeClient { client };
        let height = node.block_count()?;
        info!(height, url = %config.rpc_url, "connected to bitcoin node");
        Ok(node)
    }

    /// Fetch and decode a transaction by txid (`getrawtransaction` verbose).
    pub fn raw_transaction(&self, txid: &Txid) -> BattleResult<TxRecord> {
        let info = self.client.get_raw_transaction_info(txid, None)?;
        Ok(TxRecord::from_verbose(&info))
    }

    /// Decode serialized transaction bytes via the node.
    pub fn decode_transaction(&self, raw: &[u8]) -> BattleResult<TxRecord> {
        let decoded = self.client.decode_raw_transaction(raw, None)?;
        Ok(TxRecord::from_decoded(&decoded))
    }
}

impl NodeApi for NodeClient {
    fn block_count(&self) -> BattleResult<u64> {
        Ok(self.client.get_block_count()?)
    }

    fn smart_fee_rate(&self) -> BattleResult<Option<f64>> {
        let estimate = self
            .client
            .estimate_smart_fee(1, Some(EstimateMode::Conservative))?;
        // The node reports BTC/kvB; we work in sat/vbyte.
        Ok(estimate
            .fee_rate
            .map(|per_kvb| per_kvb.to_sat() as f64 / 1000.0))
    }

    fn mempool_entry(&self, txid: &Txid) -> BattleResult<MempoolEntry> {
        let entry = self.client.get_mempool_entry(txid)?;
        Ok(MempoolEntry {
            vsize: entry.vsize,
            descendant_fee: entry.fees.descendant,
        })
    }

    fn list_unspent_confirmed(&self) -> BattleResult<Vec<FundingUtxo>> {
        let unspent = self.client.list_unspent(Some(1), None, None, None, None)?;
        Ok(unspent
            .into_iter()
            .map(|utxo| FundingUtxo {
                outpoint: OutPoint::new(utxo.txid, utxo.vout),
                amount: utxo.amount,
                script_pubkey: utxo.script_pub_key,
                spendable: utxo.spendable,
            })
            .collect())
    }

    fn sign_with_wallet(&self, tx: &Transaction) -> BattleResult<Transaction> {
        // The `complete` flag is left unchecked: the wallet cannot know the
        // contested input's key, so the result is completed locally.
        let signed = self
            .client
            .sign_raw_transaction_with_wallet(tx, None, None)?;
        signed.transaction().map_err(|e| {
            BattleError::transaction(format!("wallet returned an undecodable transaction: {e}"))
        })
    }

    fn broadcast(&self, tx: &Transaction) -> BattleResult<Txid> {
        Ok(self.client.send_raw_transaction(tx)?)
    }

    fn prev_out(&self, outpoint: &OutPoint) -> BattleResult<TxOut> {
        let info = self.client.get_raw_transaction_info(&outpoint.txid, None)?;
        let output = info.vout.get(outpoint.vout as usize).ok_or_else(|| {
            BattleError::transaction(format!("previous output {outpoint} does not exist"))
        })?;
        Ok(TxOut {
            value: output.value,
            script_pubkey: ScriptBuf::from(output.script_pub_key.hex.clone()),
        })
    }
}
