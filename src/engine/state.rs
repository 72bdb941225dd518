//! Shared battle state: the monitored-output table and the funding slot.
//!
//! Workers and replacement tasks mutate both concurrently; every
//! check-then-act sequence happens under the relevant mutex.

use crate::engine::funding::FundingUtxo;
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// One output the agent has committed to defending.
#[derive(Debug, Clone)]
pub struct TrackedUtxo {
    pub outpoint: OutPoint,
    pub address: String,
    pub amount: Amount,
    pub script_pubkey: ScriptBuf,
}

impl TrackedUtxo {
    pub fn prev_out(&self) -> TxOut {
        TxOut {
            value: self.amount,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// Mutable state shared by every worker. Tests construct isolated instances.
#[derive(Debug, Default)]
pub struct BattleState {
    monitored: Mutex<HashMap<OutPoint, TrackedUtxo>>,
    funding: Mutex<Option<FundingUtxo>>,
}

impl BattleState {
    pub fn new() -> BattleState {
        BattleState::default()
    }

    /// Start defending an output. Re-inserting a known outpoint is a no-op.
    pub fn monitor(&self, utxo: TrackedUtxo) {
        lock(&self.monitored).entry(utxo.outpoint).or_insert(utxo);
    }

    /// Stop tracking an output. Unknown outpoints are ignored.
    pub fn release(&self, outpoint: &OutPoint) {
        lock(&self.monitored).remove(outpoint);
    }

    pub fn monitored(&self, outpoint: &OutPoint) -> Option<TrackedUtxo> {
        lock(&self.monitored).get(outpoint).cloned()
    }

    pub fn monitored_count(&self) -> usize {
        lock(&self.monitored).len()
    }

    pub fn funding(&self) -> Option<FundingUtxo> {
        lock(&self.funding).clone()
    }

    /// Cache a funding output unless one is already cached; returns the
    /// winner so concurrent selectors agree on a single output.
    pub fn cache_funding(&self, utxo: FundingUtxo) -> FundingUtxo {
        let mut slot = lock(&self.funding);
        slot.get_or_insert(utxo).clone()
    }

    pub fn clear_funding(&self) {
        lock(&self.funding).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
