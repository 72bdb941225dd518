//! # Fee & Size Estimation
//!
//! Virtual-size estimates for the transactions the agent builds, and the
//! next-fee arithmetic that keeps a replacement one step ahead of a
//! competitor under the node's replacement policy.

use crate::signer::ScriptClass;
use bitcoin::{Amount, Script};

// Non-witness bytes per input: outpoint (36) + script length + scriptSig +
// sequence (4). Witness inputs carry an empty scriptSig (41 bytes base) and
// their signature data in the witness, which weighs a quarter.
const P2PKH_INPUT_SIZE: u64 = 148;
const WITNESS_INPUT_BASE_SIZE: u64 = 41;
const NESTED_P2WPKH_REDEEM_SIZE: u64 = 23;
const P2WPKH_WITNESS_SIZE: u64 = 108;
const P2TR_WITNESS_SIZE: u64 = 66;

/// Per-class input counts for a transaction under construction.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputCounts {
    pub p2pkh: u64,
    pub nested_p2wpkh: u64,
    pub p2wpkh: u64,
    pub p2tr: u64,
}

impl InputCounts {
    pub fn add(&mut self, class: ScriptClass) {
        match class {
            ScriptClass::P2pkh => self.p2pkh += 1,
            ScriptClass::NestedP2wpkh => self.nested_p2wpkh += 1,
            ScriptClass::P2wpkh => self.p2wpkh += 1,
            ScriptClass::P2tr => self.p2tr += 1,
        }
    }

    fn total(&self) -> u64 {
        self.p2pkh + self.nested_p2wpkh + self.p2wpkh + self.p2tr
    }

    fn has_witness(&self) -> bool {
        self.nested_p2wpkh + self.p2wpkh + self.p2tr > 0
    }
}

/// Estimate the virtual size of a transaction spending the counted inputs to
/// a single output with the given scriptPubKey.
///
/// This is standard BIP-141 weight arithmetic: amortized, each P2PKH input
/// contributes 148 vbytes, P2SH-P2WPKH 91, P2WPKH 68, and P2TR 57.5.
pub fn estimate_vsize(inputs: InputCounts, destination_script: &Script) -> u64 {
    let output_script_len = destination_script.len() as u64;
    let base = 8 // version + locktime
        + varint_len(inputs.total())
        + varint_len(1)
        + inputs.p2pkh * P2PKH_INPUT_SIZE
        + inputs.nested_p2wpkh * (WITNESS_INPUT_BASE_SIZE + NESTED_P2WPKH_REDEEM_SIZE)
        + inputs.p2wpkh * WITNESS_INPUT_BASE_SIZE
        + inputs.p2tr * WITNESS_INPUT_BASE_SIZE
        + 8 + varint_len(output_script_len) + output_script_len;

    let mut weight = base * 4;
    if inputs.has_witness() {
        weight += 2 // segwit marker + flag
            + (inputs.nested_p2wpkh + inputs.p2wpkh) * P2WPKH_WITNESS_SIZE
            + inputs.p2tr * P2TR_WITNESS_SIZE;
    }
    weight.div_ceil(4)
}

/// Calculate the fee for replacing a competitor transaction, and whether
/// paying it would consume the contested output entirely.
///
/// The replacement policy requires both a higher fee rate and a higher
/// absolute fee than the transaction being evicted; one extra sat/vbyte on
/// top of a 10% rate bump satisfies both with room to spare.
pub fn next_fee(
    competitor_fee: Amount,
    competitor_vsize: u64,
    our_vsize: u64,
    contested_value: Amount,
) -> (Amount, bool) {
    let competitor_rate = competitor_fee.to_sat() as f64 / competitor_vsize as f64;
    let new_rate = 1.0 + competitor_rate * 1.1;
    let fee = Amount::from_sat((our_vsize as f64 * new_rate).ceil() as u64);
    (fee, fee >= contested_value)
}

fn varint_len(value: u64) -> u64 {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
