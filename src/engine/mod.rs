//! # RBF Engine
//!
//! The decision core of the agent. Every decoded mempool transaction runs
//! through a five-step classification pipeline, stopping at the first match:
//!
//! 1. Confirmed transaction spending a monitored output: the battle ended,
//!    won or lost depending on whether an output paid the destination.
//! 2. Transaction paying the destination: our own replacement echoing back,
//!    unless it has extra outputs (a possible decoy split, logged).
//! 3. Unconfirmed transaction funding a watched address: monitor the new
//!    output and broadcast the initial sweep.
//! 4. Unconfirmed transaction spending a monitored output: a competitor;
//!    dispatch a replacement attempt.
//! 5. Anything else is ignored.
//!
//! Classification is idempotent: a stale or replayed event either touches
//! nothing, touches an entry that was already cleaned up, or loses to a
//! prior broadcast under the node's replacement policy.

pub mod funding;
pub mod rejection;
pub mod state;

pub use funding::{select_funding_utxo, FundingUtxo};
pub use rejection::{classify_rejection, Rejection};
pub use state::{BattleState, TrackedUtxo};

use crate::address_table::AddressTable;
use crate::config::Config;
use crate::error::{BattleError, BattleResult};
use crate::fees::{estimate_vsize, next_fee, InputCounts};
use crate::services::node_client::NodeApi;
use crate::signer::{classify_script, sign_input, ScriptClass};
use crate::tx_record::TxRecord;
use bitcoin::absolute::LockTime;
use bitcoin::script::PushBytesBuf;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Txid};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Workers pulling from the dispatch queue.
pub const WORKER_COUNT: usize = 16;
/// Dispatch queue capacity; a full queue blocks the ingest loop.
pub const QUEUE_CAPACITY: usize = 100;

/// Fallback fee rate in sat/vbyte when the node has no estimate.
const DEFAULT_FEE_RATE: f64 = 2.0;
const DUST_LIMIT: Amount = Amount::from_sat(547);

/// Which pipeline branch handled a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Won,
    Lost,
    OwnReplacement,
    Detected,
    Contested,
    Ignored,
}

pub struct Engine {
    config: Config,
    node: Arc<dyn NodeApi>,
    addresses: AddressTable,
    state: BattleState,
    replacements_in_flight: AtomicUsize,
}

impl Engine {
    pub fn new(config: Config, node: Arc<dyn NodeApi>, addresses: AddressTable) -> Engine {
        Engine {
            config,
            node,
            addresses,
            state: BattleState::new(),
            replacements_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> &BattleState {
        &self.state
    }

    /// Run one transaction through the classification pipeline.
    pub fn process_transaction(self: &Arc<Self>, record: &TxRecord) -> Classification {
        if record.confirmations > 0 {
            return self.process_confirmed(record);
        }

        // Something pays our destination. A single-output transaction is one
        // of our own replacements echoing back; anything else may be a decoy
        // trying to look like one.
        let pays_destination = record
            .outputs
            .iter()
            .find(|output| output.address.as_deref() == Some(self.config.destination_address.as_str()));
        if let Some(output) = pays_destination {
            if record.outputs.len() > 1 {
                warn!(
                    txid = %record.txid,
                    value = %output.value.to_btc(),
                    "transaction pays the destination but has extra outputs"
                );
            } else {
                return Classification::OwnReplacement;
            }
        }

        // New output at a watched address: commit to the battle and sweep.
        for output in &record.outputs {
            let Some(address) = output.address.as_deref() else {
                continue;
            };
            if !self.addresses.contains(address) {
                continue;
            }
            let utxo = TrackedUtxo {
                outpoint: OutPoint::new(record.txid, output.n),
                address: address.to_string(),
                amount: output.value,
                script_pubkey: output.script_pubkey.clone(),
            };
            info!(
                address,
                txid = %record.txid,
                vout = output.n,
                amount = %output.value.to_btc(),
                "detected transaction to watched address, trying to spend it"
            );
            self.state.monitor(utxo.clone());
            if let Err(err) = self.spend(&utxo) {
                // Someone raced us; the replacement logic recovers when their
                // spend shows up.
                error!(%err, utxo = %utxo.outpoint, "failed to send initial spend transaction");
            }
            return Classification::Detected;
        }

        // A competitor is spending monitored outputs.
        let mut contested = false;
        for outpoint in &record.inputs {
            let Some(utxo) = self.state.monitored(outpoint) else {
                continue;
            };
            if !contested
                && record
                    .outputs
                    .iter()
                    .any(|output| output.script_pubkey.is_op_return())
            {
                warn!(txid = %record.txid, "competitor transaction carries an OP_RETURN output");
            }
            contested = true;
            self.dispatch_replace(record.clone(), utxo);
        }
        if contested {
            return Classification::Contested;
        }

        Classification::Ignored
    }

    /// Step 1: a confirmed transaction. If it spends a monitored output the
    /// battle is over one way or the other.
    fn process_confirmed(self: &Arc<Self>, record: &TxRecord) -> Classification {
        for outpoint in &record.inputs {
            let Some(utxo) = self.state.monitored(outpoint) else {
                continue;
            };
            let destination_output = record
                .outputs
                .iter()
                .find(|output| output.address.as_deref() == Some(self.config.destination_address.as_str()));

            let classification = match destination_output {
                Some(output) => {
                    info!(
                        address = %utxo.address,
                        txid = %record.txid,
                        utxo = %utxo.outpoint,
                        received_value = %output.value.to_btc(),
                        original_value = %utxo.amount.to_btc(),
                        block_hash = ?record.block_hash,
                        "battle won, transaction was received by us"
                    );
                    Classification::Won
                }
                None => {
                    warn!(
                        address = %utxo.address,
                        txid = %record.txid,
                        utxo = %utxo.outpoint,
                        original_value = %utxo.amount.to_btc(),
                        block_hash = ?record.block_hash,
                        "battle lost"
                    );
                    Classification::Lost
                }
            };

            self.state.release(&utxo.outpoint);

            // Select a new funding output for the next battle.
            self.state.clear_funding();
            if let Err(err) = self.funding_utxo() {
                warn!(%err, "no funding output available for the next battle");
            }
            return classification;
        }

        for output in &record.outputs {
            let Some(address) = output.address.as_deref() else {
                continue;
            };
            if self.addresses.contains(address) {
                // Too late to race this one; it only matters once someone
                // tries to spend it.
                info!(
                    address,
                    txid = %record.txid,
                    block_hash = ?record.block_hash,
                    "transaction to watched address was confirmed"
                );
                return Classification::Ignored;
            }
        }

        Classification::Ignored
    }

    /// Broadcast the initial 1-in/1-out sweep of a freshly detected output.
    pub fn spend(&self, utxo: &TrackedUtxo) -> BattleResult<Txid> {
        let class = self.script_class(&utxo.script_pubkey)?;
        let mut inputs = InputCounts::default();
        inputs.add(class);
        let vsize = estimate_vsize(inputs, &self.config.destination_script);

        let fee_rate = match self.node.smart_fee_rate() {
            Ok(Some(rate)) => {
                debug!(fee_rate = rate, "fee estimate from node");
                rate
            }
            _ => {
                debug!(
                    fee_rate = DEFAULT_FEE_RATE,
                    "no fee estimate from node, using default fee rate"
                );
                DEFAULT_FEE_RATE
            }
        };
        let fee = Amount::from_sat((vsize as f64 * fee_rate) as u64);
        let output_value = utxo
            .amount
            .checked_sub(fee)
            .filter(|value| *value > Amount::ZERO)
            .ok_or_else(|| BattleError::transaction("not enough funds to cover fee"))?;

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: utxo.outpoint,
                ..Default::default()
            }],
            output: vec![TxOut {
                value: output_value,
                script_pubkey: self.config.destination_script.clone(),
            }],
        };

        let key = self.key_for(&utxo.address)?;
        sign_input(&mut tx, 0, &key, &utxo.prev_out(), &self.node)?;

        debug!(fee_rate, total_fee = fee.to_sat(), vsize, "broadcasting spend");
        let txid = self.node.broadcast(&tx)?;
        info!(
            utxo = %utxo.outpoint,
            txid = %txid,
            fee_rate,
            value = %utxo.amount.to_btc(),
            output_value = %output_value.to_btc(),
            "spent utxo from watched address"
        );
        Ok(txid)
    }

    /// Hand a replacement attempt to its own task so the worker can return
    /// to the queue. Without a runtime the attempt runs inline.
    fn dispatch_replace(self: &Arc<Self>, record: TxRecord, utxo: TrackedUtxo) {
        let in_flight = self.replacements_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(in_flight, counterpart = %record.txid, "dispatching replacement attempt");

        let engine = Arc::clone(self);
        let attempt = move || {
            engine.try_replace_attacker(&record, &utxo);
            engine.replacements_in_flight.fetch_sub(1, Ordering::SeqCst);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(attempt);
            }
            Err(_) => attempt(),
        }
    }

    pub fn replacements_in_flight(&self) -> usize {
        self.replacements_in_flight.load(Ordering::SeqCst)
    }

    /// Try to outbid a competitor spend of a monitored output.
    pub fn try_replace_attacker(&self, counterpart: &TxRecord, utxo: &TrackedUtxo) {
        let entry = match self.node.mempool_entry(&counterpart.txid) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    counterpart = %counterpart.txid,
                    %err,
                    "no mempool entry, the attacking transaction was probably already replaced"
                );
                return;
            }
        };

        let counter_fee = entry.descendant_fee;
        let counter_rate = counter_fee.to_sat() as f64 / entry.vsize as f64;
        info!(
            counterpart = %counterpart.txid,
            utxo = %utxo.outpoint,
            fee_rate = counter_rate,
            total_fee = %counter_fee.to_btc(),
            fee_percentage = counter_fee.to_sat() as f64 / utxo.amount.to_sat() as f64 * 100.0,
            "someone is spending a monitored utxo"
        );

        if counter_fee > utxo.amount {
            warn!(
                fees = %counter_fee.to_btc(),
                amount = %utxo.amount.to_btc(),
                "counterpart paid more in fees than the utxo is worth, giving up"
            );
            return;
        }
        if counter_fee == utxo.amount {
            warn!(
                fees = %counter_fee.to_btc(),
                amount = %utxo.amount.to_btc(),
                "counterpart burned the utxo, giving up"
            );
            self.state.release(&utxo.outpoint);
            return;
        }

        let funding = match self.funding_utxo() {
            Ok(funding) => funding,
            Err(err) => {
                error!(%err, "cannot fund a replacement");
                return;
            }
        };

        let contested_class = match self.script_class(&utxo.script_pubkey) {
            Ok(class) => class,
            Err(err) => {
                error!(%err, utxo = %utxo.outpoint, "cannot size the contested input");
                return;
            }
        };
        let funding_class = match self.script_class(&funding.script_pubkey) {
            Ok(class) => class,
            Err(err) => {
                error!(%err, utxo = %funding.outpoint, "cannot size the funding input");
                return;
            }
        };
        let mut inputs = InputCounts::default();
        inputs.add(contested_class);
        inputs.add(funding_class);
        let vsize = estimate_vsize(inputs, &self.config.destination_script);

        let (new_fee, burn) = next_fee(counter_fee, entry.vsize, vsize, utxo.amount);
        let new_rate = new_fee.to_sat() as f64 / vsize as f64;
        let fee_percentage = new_fee.to_sat() as f64 / utxo.amount.to_sat() as f64 * 100.0;

        if burn {
            warn!(
                fee_percentage,
                counterpart = %counterpart.txid,
                "burning utxo as the replacement would spend most of its value on fees"
            );
            if let Err(err) = self.burn(utxo) {
                error!(%err, "failed to broadcast burn transaction");
            }
            return;
        }

        let output_value = match (utxo.amount + funding.amount).checked_sub(new_fee) {
            Some(value) if value >= DUST_LIMIT => value,
            _ => {
                info!(utxo = %utxo.outpoint, "replacement output would be below the dust limit, giving up");
                return;
            }
        };

        info!(
            counterpart = %counterpart.txid,
            fee_percentage,
            fee_rate = new_rate,
            total_fee = %new_fee.to_btc(),
            output_value = %output_value.to_btc(),
            "trying to broadcast replacement"
        );

        match self.replace(output_value, &funding, utxo) {
            Ok(txid) => {
                info!(
                    counterpart = %counterpart.txid,
                    replacement = %txid,
                    fee_increase = counter_rate / new_rate * 100.0,
                    "replaced counterpart transaction"
                );
                // The funding output is spent by this replacement now.
                self.state.clear_funding();
            }
            Err(err) => self.handle_replace_rejection(err, utxo),
        }
    }

    fn handle_replace_rejection(&self, err: BattleError, utxo: &TrackedUtxo) {
        match classify_rejection(&err.to_string()) {
            Rejection::InsufficientFee => {
                // Another replacement slipped in; we'll race that one when
                // its notification arrives.
                warn!(%err, "insufficient fee for replacement");
            }
            Rejection::NotEnoughFunds => {
                warn!(%err, "no money left to spend, burning");
                if let Err(burn_err) = self.burn(utxo) {
                    error!(%burn_err, "failed to broadcast burn transaction");
                }
            }
            Rejection::Dust => {
                warn!(%err, "replacement rejected as it would leave only dust, burning");
                if let Err(burn_err) = self.burn(utxo) {
                    error!(%burn_err, "failed to broadcast burn transaction");
                }
            }
            Rejection::InputsMissingOrSpent => {
                warn!(%err, utxo = %utxo.outpoint, "counterpart transaction was confirmed");
            }
            Rejection::Other => {
                error!(%err, "error replacing counterpart transaction");
            }
        }
    }

    /// Build, wallet-sign, locally sign, and broadcast a replacement.
    fn replace(
        &self,
        output_value: Amount,
        funding: &FundingUtxo,
        utxo: &TrackedUtxo,
    ) -> BattleResult<Txid> {
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![
                TxIn {
                    previous_output: utxo.outpoint,
                    ..Default::default()
                },
                TxIn {
                    previous_output: funding.outpoint,
                    ..Default::default()
                },
            ],
            output: vec![TxOut {
                value: output_value,
                script_pubkey: self.config.destination_script.clone(),
            }],
        };

        // The wallet signs the funding input. The contested input is signed
        // afterwards, on the returned transaction: the wallet does not hold
        // its key, and a taproot sighash must see the final input set anyway.
        let mut signed = self.node.sign_with_wallet(&tx)?;
        let key = self.key_for(&utxo.address)?;
        sign_input(&mut signed, 0, &key, &utxo.prev_out(), &self.node)?;

        self.node.broadcast(&signed)
    }

    /// Destroy a contested output: spend it into an OP_RETURN with zero
    /// value so no one profits from it.
    pub fn burn(&self, utxo: &TrackedUtxo) -> BattleResult<Txid> {
        let payload = PushBytesBuf::try_from(self.config.burn_message.clone().into_bytes())
            .map_err(|_| BattleError::transaction("burn message exceeds push limit"))?;

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: utxo.outpoint,
                ..Default::default()
            }],
            output: vec![TxOut {
                value: Amount::ZERO,
                script_pubkey: ScriptBuf::new_op_return(payload),
            }],
        };

        let key = self.key_for(&utxo.address)?;
        sign_input(&mut tx, 0, &key, &utxo.prev_out(), &self.node)?;
        let txid = self.node.broadcast(&tx)?;

        info!(txid = %txid, utxo = %utxo.outpoint, "burned the contested output");
        self.state.release(&utxo.outpoint);
        Ok(txid)
    }

    /// The cached funding output, selecting a fresh one when the slot is
    /// empty.
    pub fn funding_utxo(&self) -> BattleResult<FundingUtxo> {
        if let Some(utxo) = self.state.funding() {
            return Ok(utxo);
        }
        let candidates = self.node.list_unspent_confirmed()?;
        let selected = select_funding_utxo(candidates).ok_or(BattleError::NoUsableUtxo)?;
        let class = classify_script(&selected.script_pubkey)
            .map(|class| class.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        info!(
            utxo = %selected.outpoint,
            value = %selected.amount.to_btc(),
            script_class = %class,
            "selected funding utxo"
        );
        Ok(self.state.cache_funding(selected))
    }

    fn key_for(&self, address: &str) -> BattleResult<String> {
        self.addresses
            .get(address)
            .map(str::to_string)
            .ok_or_else(|| {
                BattleError::address_table(format!("no private key for address {address}"))
            })
    }

    fn script_class(&self, script: &ScriptBuf) -> BattleResult<ScriptClass> {
        classify_script(script).ok_or_else(|| BattleError::UnsupportedScript {
            script: script.to_hex_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_table::AddressTable;
    use crate::keys::derive;
    use crate::services::node_client::MempoolEntry;
    use crate::tx_record::OutputRecord;
    use bitcoin::{Address, Network};
    use bitcoincore_rpc::Auth;
    use std::collections::{HashMap, VecDeque};
    use std::str::FromStr;
    use std::sync::Mutex;

    const WATCHED_PASSPHRASE: &str = "engine test watched";

    #[derive(Default)]
    struct MockNode {
        broadcasts: Mutex<Vec<Transaction>>,
        broadcast_failures: Mutex<VecDeque<String>>,
        mempool: Mutex<HashMap<Txid, MempoolEntry>>,
        mempool_queries: Mutex<Vec<Txid>>,
        unspent: Mutex<Vec<FundingUtxo>>,
        prevouts: Mutex<HashMap<OutPoint, TxOut>>,
    }

    impl MockNode {
        fn broadcast_count(&self) -> usize {
            self.broadcasts.lock().unwrap().len()
        }

        fn broadcast(&self, index: usize) -> Transaction {
            self.broadcasts.lock().unwrap()[index].clone()
        }
    }

    impl NodeApi for MockNode {
        fn block_count(&self) -> BattleResult<u64> {
            Ok(100)
        }

        fn smart_fee_rate(&self) -> BattleResult<Option<f64>> {
            Ok(None)
        }

        fn mempool_entry(&self, txid: &Txid) -> BattleResult<MempoolEntry> {
            self.mempool_queries.lock().unwrap().push(*txid);
            self.mempool
                .lock()
                .unwrap()
                .get(txid)
                .copied()
                .ok_or_else(|| {
                    BattleError::transaction("No such mempool transaction".to_string())
                })
        }

        fn list_unspent_confirmed(&self) -> BattleResult<Vec<FundingUtxo>> {
            Ok(self.unspent.lock().unwrap().clone())
        }

        fn sign_with_wallet(&self, tx: &Transaction) -> BattleResult<Transaction> {
            Ok(tx.clone())
        }

        fn broadcast(&self, tx: &Transaction) -> BattleResult<Txid> {
            if let Some(message) = self.broadcast_failures.lock().unwrap().pop_front() {
                return Err(BattleError::transaction(message));
            }
            let txid = tx.compute_txid();
            self.broadcasts.lock().unwrap().push(tx.clone());
            Ok(txid)
        }

        fn prev_out(&self, outpoint: &OutPoint) -> BattleResult<TxOut> {
            self.prevouts
                .lock()
                .unwrap()
                .get(outpoint)
                .cloned()
                .ok_or_else(|| {
                    BattleError::transaction(format!("missing previous output {outpoint}"))
                })
        }
    }

    struct Harness {
        engine: Arc<Engine>,
        node: Arc<MockNode>,
        watched_p2wpkh: String,
        watched_p2tr: String,
        destination: String,
    }

    fn harness() -> Harness {
        let watched = derive(WATCHED_PASSPHRASE, Network::Regtest).unwrap();
        let destination_row = derive("engine test destination", Network::Regtest).unwrap();
        let destination = Address::from_str(&destination_row.p2wpkh)
            .unwrap()
            .assume_checked();

        let config = Config {
            network: Network::Regtest,
            destination_address: destination.to_string(),
            destination_script: destination.script_pubkey(),
            burn_message: "engine test burn".to_string(),
            rpc_url: "http://127.0.0.1:18443".to_string(),
            rpc_auth: Auth::None,
            zmq_endpoint: "tcp://127.0.0.1:18503".to_string(),
            address_file: "addresses.csv".into(),
        };

        let node = Arc::new(MockNode::default());
        let engine = Arc::new(Engine::new(
            config,
            Arc::clone(&node) as Arc<dyn NodeApi>,
            AddressTable::from_rows(std::slice::from_ref(&watched)),
        ));
        Harness {
            engine,
            node,
            watched_p2wpkh: watched.p2wpkh,
            watched_p2tr: watched.p2tr,
            destination: destination.to_string(),
        }
    }

    fn txid(byte: u8) -> Txid {
        Txid::from_str(&hex::encode([byte; 32])).unwrap()
    }

    fn output_to(address: &str, n: u32, value: Amount) -> OutputRecord {
        let address = Address::from_str(address).unwrap().assume_checked();
        OutputRecord {
            n,
            value,
            script_pubkey: address.script_pubkey(),
            address: Some(address.to_string()),
        }
    }

    fn monitored_utxo(harness: &Harness, address: &str, value: Amount) -> TrackedUtxo {
        let parsed = Address::from_str(address).unwrap().assume_checked();
        let utxo = TrackedUtxo {
            outpoint: OutPoint::new(txid(0xaa), 0),
            address: address.to_string(),
            amount: value,
            script_pubkey: parsed.script_pubkey(),
        };
        harness.engine.state().monitor(utxo.clone());
        utxo
    }

    fn funding(vout: u32, value: Amount) -> FundingUtxo {
        let row = derive("engine test funding", Network::Regtest).unwrap();
        let address = Address::from_str(&row.p2wpkh).unwrap().assume_checked();
        FundingUtxo {
            outpoint: OutPoint::new(txid(0xfd), vout),
            amount: value,
            script_pubkey: address.script_pubkey(),
            spendable: true,
        }
    }

    #[test]
    fn test_detect_broadcasts_initial_spend() {
        let h = harness();
        let record = TxRecord {
            txid: txid(0x01),
            confirmations: 0,
            block_hash: None,
            inputs: vec![OutPoint::new(txid(0x02), 3)],
            outputs: vec![output_to(&h.watched_p2wpkh, 0, Amount::from_sat(100_000))],
        };

        assert_eq!(
            h.engine.process_transaction(&record),
            Classification::Detected
        );
        assert_eq!(h.node.broadcast_count(), 1);
        assert!(h
            .engine
            .state()
            .monitored(&OutPoint::new(record.txid, 0))
            .is_some());

        // One input, one output to the destination, fee at the 2 sat/vB
        // default over 110 vbytes.
        let spend = h.node.broadcast(0);
        assert_eq!(spend.input.len(), 1);
        assert_eq!(spend.input[0].previous_output, OutPoint::new(record.txid, 0));
        assert_eq!(spend.output.len(), 1);
        assert_eq!(spend.output[0].value, Amount::from_sat(99_780));
        assert!(!spend.input[0].witness.is_empty());
    }

    #[test]
    fn test_own_replacement_is_left_alone() {
        let h = harness();
        let record = TxRecord {
            txid: txid(0x03),
            confirmations: 0,
            block_hash: None,
            inputs: vec![OutPoint::new(txid(0xaa), 0)],
            outputs: vec![output_to(&h.destination, 0, Amount::from_sat(90_000))],
        };

        assert_eq!(
            h.engine.process_transaction(&record),
            Classification::OwnReplacement
        );
        assert_eq!(h.node.broadcast_count(), 0);
    }

    #[test]
    fn test_decoy_split_falls_through() {
        let h = harness();
        let record = TxRecord {
            txid: txid(0x04),
            confirmations: 0,
            block_hash: None,
            inputs: vec![OutPoint::new(txid(0x05), 0)],
            outputs: vec![
                output_to(&h.destination, 0, Amount::from_sat(1_000)),
                output_to(
                    &derive("attacker change", Network::Regtest).unwrap().p2wpkh,
                    1,
                    Amount::from_sat(89_000),
                ),
            ],
        };

        assert_eq!(
            h.engine.process_transaction(&record),
            Classification::Ignored
        );
        assert_eq!(h.node.broadcast_count(), 0);
    }

    #[test]
    fn test_confirmed_to_destination_is_a_win() {
        let h = harness();
        let utxo = monitored_utxo(&h, &h.watched_p2wpkh.clone(), Amount::from_sat(100_000));
        let record = TxRecord {
            txid: txid(0x06),
            confirmations: 1,
            block_hash: None,
            inputs: vec![utxo.outpoint],
            outputs: vec![output_to(&h.destination, 0, Amount::from_sat(99_000))],
        };

        assert_eq!(h.engine.process_transaction(&record), Classification::Won);
        assert_eq!(h.engine.state().monitored_count(), 0);
    }

    #[test]
    fn test_confirmed_elsewhere_is_a_loss() {
        let h = harness();
        let utxo = monitored_utxo(&h, &h.watched_p2wpkh.clone(), Amount::from_sat(100_000));
        let record = TxRecord {
            txid: txid(0x07),
            confirmations: 2,
            block_hash: None,
            inputs: vec![utxo.outpoint],
            outputs: vec![output_to(
                &derive("attacker wallet", Network::Regtest).unwrap().p2wpkh,
                0,
                Amount::from_sat(99_000),
            )],
        };

        assert_eq!(h.engine.process_transaction(&record), Classification::Lost);
        assert_eq!(h.engine.state().monitored_count(), 0);
    }

    #[test]
    fn test_contested_queries_the_competitor_entry() {
        let h = harness();
        let utxo = monitored_utxo(&h, &h.watched_p2wpkh.clone(), Amount::from_sat(100_000));
        let record = TxRecord {
            txid: txid(0x08),
            confirmations: 0,
            block_hash: None,
            inputs: vec![utxo.outpoint],
            outputs: vec![output_to(
                &derive("attacker wallet", Network::Regtest).unwrap().p2wpkh,
                0,
                Amount::from_sat(99_500),
            )],
        };

        // No mempool entry programmed: the attempt bails after the lookup.
        assert_eq!(
            h.engine.process_transaction(&record),
            Classification::Contested
        );
        assert_eq!(*h.node.mempool_queries.lock().unwrap(), vec![record.txid]);
        assert_eq!(h.node.broadcast_count(), 0);
        assert_eq!(h.engine.replacements_in_flight(), 0);
    }

    #[test]
    fn test_competitor_burn_releases_the_entry() {
        let h = harness();
        let utxo = monitored_utxo(&h, &h.watched_p2wpkh.clone(), Amount::from_sat(100_000));
        let record = TxRecord {
            txid: txid(0x09),
            confirmations: 0,
            block_hash: None,
            inputs: vec![utxo.outpoint],
            outputs: vec![],
        };
        h.node.mempool.lock().unwrap().insert(
            record.txid,
            MempoolEntry {
                vsize: 100,
                descendant_fee: Amount::from_sat(100_000),
            },
        );

        h.engine.process_transaction(&record);
        assert_eq!(h.engine.state().monitored_count(), 0);
        assert_eq!(h.node.broadcast_count(), 0);
    }

    #[test]
    fn test_overpaying_competitor_keeps_the_entry() {
        let h = harness();
        let utxo = monitored_utxo(&h, &h.watched_p2wpkh.clone(), Amount::from_sat(100_000));
        let record = TxRecord {
            txid: txid(0x0a),
            confirmations: 0,
            block_hash: None,
            inputs: vec![utxo.outpoint],
            outputs: vec![],
        };
        h.node.mempool.lock().unwrap().insert(
            record.txid,
            MempoolEntry {
                vsize: 100,
                descendant_fee: Amount::from_sat(150_000),
            },
        );

        h.engine.process_transaction(&record);
        assert_eq!(h.engine.state().monitored_count(), 1);
        assert_eq!(h.node.broadcast_count(), 0);
    }

    #[test]
    fn test_replacement_spends_contested_and_funding() {
        let h = harness();
        let utxo = monitored_utxo(&h, &h.watched_p2wpkh.clone(), Amount::from_sat(100_000));
        h.node
            .unspent
            .lock()
            .unwrap()
            .push(funding(0, Amount::from_sat(20_000)));
        let record = TxRecord {
            txid: txid(0x0b),
            confirmations: 0,
            block_hash: None,
            inputs: vec![utxo.outpoint],
            outputs: vec![],
        };
        h.node.mempool.lock().unwrap().insert(
            record.txid,
            MempoolEntry {
                vsize: 150,
                descendant_fee: Amount::from_sat(300),
            },
        );

        h.engine.process_transaction(&record);

        assert_eq!(h.node.broadcast_count(), 1);
        let replacement = h.node.broadcast(0);
        assert_eq!(replacement.input.len(), 2);
        assert_eq!(replacement.input[0].previous_output, utxo.outpoint);
        assert_eq!(replacement.output.len(), 1);
        // 100_000 + 20_000 minus ceil(178 * (1 + 2 * 1.1)).
        assert_eq!(replacement.output[0].value, Amount::from_sat(119_430));
        assert!(!replacement.input[0].witness.is_empty());

        // The slot is cleared once the funding output is committed.
        assert!(h.engine.state().funding().is_none());
        // The battle continues until a confirmation shows up.
        assert_eq!(h.engine.state().monitored_count(), 1);
    }

    #[test]
    fn test_taproot_replacement_fetches_foreign_prevout() {
        let h = harness();
        let utxo = monitored_utxo(&h, &h.watched_p2tr.clone(), Amount::from_sat(100_000));
        let funding_utxo = funding(0, Amount::from_sat(20_000));
        h.node.prevouts.lock().unwrap().insert(
            funding_utxo.outpoint,
            TxOut {
                value: funding_utxo.amount,
                script_pubkey: funding_utxo.script_pubkey.clone(),
            },
        );
        h.node.unspent.lock().unwrap().push(funding_utxo);

        let record = TxRecord {
            txid: txid(0x0c),
            confirmations: 0,
            block_hash: None,
            inputs: vec![utxo.outpoint],
            outputs: vec![],
        };
        h.node.mempool.lock().unwrap().insert(
            record.txid,
            MempoolEntry {
                vsize: 120,
                descendant_fee: Amount::from_sat(240),
            },
        );

        h.engine.process_transaction(&record);

        assert_eq!(h.node.broadcast_count(), 1);
        let replacement = h.node.broadcast(0);
        assert_eq!(replacement.input[0].witness.len(), 1);
        assert_eq!(replacement.input[0].witness[0].len(), 64);
    }

    #[test]
    fn test_dust_rejection_burns() {
        let h = harness();
        let utxo = monitored_utxo(&h, &h.watched_p2wpkh.clone(), Amount::from_sat(100_000));
        h.node
            .unspent
            .lock()
            .unwrap()
            .push(funding(0, Amount::from_sat(20_000)));
        h.node
            .broadcast_failures
            .lock()
            .unwrap()
            .push_back("-26: dust".to_string());

        let record = TxRecord {
            txid: txid(0x0d),
            confirmations: 0,
            block_hash: None,
            inputs: vec![utxo.outpoint],
            outputs: vec![],
        };
        h.node.mempool.lock().unwrap().insert(
            record.txid,
            MempoolEntry {
                vsize: 150,
                descendant_fee: Amount::from_sat(300),
            },
        );

        h.engine.process_transaction(&record);

        // The failed replacement is followed by a burn broadcast.
        assert_eq!(h.node.broadcast_count(), 1);
        let burn = h.node.broadcast(0);
        assert_eq!(burn.output.len(), 1);
        assert_eq!(burn.output[0].value, Amount::ZERO);
        assert!(burn.output[0].script_pubkey.is_op_return());
        assert_eq!(h.engine.state().monitored_count(), 0);
    }
}
