//! Funding-output selection.
//!
//! Replacements add a second, confirmed input from the agent's own wallet to
//! raise the absolute fee without depleting the contested output. The input
//! must be confirmed: the replacement policy only lets a replacement spend
//! unconfirmed outputs that the conflicting transaction already spent.

use bitcoin::{Amount, OutPoint, ScriptBuf};

/// Lower value bound, exclusive (0.00001 BTC).
pub const FUNDING_MIN: Amount = Amount::from_sat(1_000);
/// Upper value bound, exclusive (500.1 BTC).
pub const FUNDING_MAX: Amount = Amount::from_sat(50_010_000_000);

/// A confirmed wallet output usable as the extra replacement input.
#[derive(Debug, Clone)]
pub struct FundingUtxo {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub script_pubkey: ScriptBuf,
    pub spendable: bool,
}

/// Pick the smallest spendable output strictly inside the value bounds.
pub fn select_funding_utxo(mut candidates: Vec<FundingUtxo>) -> Option<FundingUtxo> {
    candidates.sort_by_key(|utxo| utxo.amount);
    candidates
        .into_iter()
        .find(|utxo| utxo.spendable && utxo.amount > FUNDING_MIN && utxo.amount < FUNDING_MAX)
}
