//! # Input Signer
//!
//! Attaches a valid signature script and/or witness to one input of a
//! partially built transaction, dispatching on the script class of the
//! previous output:
//!
//! - **P2PKH**: legacy ECDSA. The 20-byte hash in the script selects whether
//!   the compressed or the uncompressed serialization of the key is used.
//! - **P2SH**: treated as P2SH-P2WPKH. The redeem script `OP_0 <H_c>` goes in
//!   the signature script, the signature and compressed key in the witness.
//! - **P2WPKH**: segwit-v0 sighash, witness only.
//! - **P2TR**: BIP-341 key-path spend with `SIGHASH_DEFAULT`. The sighash
//!   commits to every input's previous output, so foreign prevouts are pulled
//!   through the [`PrevOutFetcher`] before signing.
//!
//! Only the target input is written; all other inputs are left untouched.

use crate::error::{BattleError, BattleResult};
use bitcoin::hashes::Hash;
use bitcoin::key::{CompressedPublicKey, TapTweak};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::{
    EcdsaSighashType, OutPoint, PublicKey, Script, ScriptBuf, TapSighashType, Transaction, TxOut,
    Witness,
};
use std::collections::HashMap;
use std::fmt;

/// The four script classes the agent can spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptClass {
    P2pkh,
    NestedP2wpkh,
    P2wpkh,
    P2tr,
}

impl fmt::Display for ScriptClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptClass::P2pkh => write!(f, "p2pkh"),
            ScriptClass::NestedP2wpkh => write!(f, "p2sh-p2wpkh"),
            ScriptClass::P2wpkh => write!(f, "p2wpkh"),
            ScriptClass::P2tr => write!(f, "p2tr"),
        }
    }
}

/// Classify a previous-output script, or `None` for anything unsupported.
pub fn classify_script(script: &Script) -> Option<ScriptClass> {
    if script.is_p2pkh() {
        Some(ScriptClass::P2pkh)
    } else if script.is_p2sh() {
        Some(ScriptClass::NestedP2wpkh)
    } else if script.is_p2wpkh() {
        Some(ScriptClass::P2wpkh)
    } else if script.is_p2tr() {
        Some(ScriptClass::P2tr)
    } else {
        None
    }
}

/// Source of previous outputs for inputs the signer does not know locally.
///
/// The taproot sighash needs the value and script of every input, including
/// ones added by the wallet (the funding input). The node client resolves
/// those over RPC; tests use a plain map.
pub trait PrevOutFetcher {
    fn prev_out(&self, outpoint: &OutPoint) -> BattleResult<TxOut>;
}

impl PrevOutFetcher for HashMap<OutPoint, TxOut> {
    fn prev_out(&self, outpoint: &OutPoint) -> BattleResult<TxOut> {
        self.get(outpoint)
            .cloned()
            .ok_or_else(|| BattleError::transaction(format!("missing previous output {outpoint}")))
    }
}

/// Sign `tx.input[idx]` for the given previous output.
///
/// `prev_out` is the output being spent by input `idx`; `prev_outs` resolves
/// the remaining inputs when a taproot sighash requires them. Any existing
/// signature on the input is overwritten.
pub fn sign_input(
    tx: &mut Transaction,
    idx: usize,
    private_key_hex: &str,
    prev_out: &TxOut,
    prev_outs: &dyn PrevOutFetcher,
) -> BattleResult<()> {
    let secret = parse_private_key(private_key_hex)?;
    let secp = Secp256k1::new();
    let pubkey = secret.public_key(&secp);
    let script = prev_out.script_pubkey.as_script();

    match classify_script(script) {
        Some(ScriptClass::P2pkh) => {
            // The script hash tells us which serialization the address used.
            let hash = &script.as_bytes()[3..23];
            let compressed_hash = PublicKey::new(pubkey).pubkey_hash();
            let uncompressed_hash = PublicKey {
                compressed: false,
                inner: pubkey,
            }
            .pubkey_hash();

            let compressed = if hash == &compressed_hash.to_byte_array()[..] {
                true
            } else if hash == &uncompressed_hash.to_byte_array()[..] {
                false
            } else {
                return Err(BattleError::HashMismatch);
            };
            let signing_key = PublicKey {
                compressed,
                inner: pubkey,
            };

            let sighash = SighashCache::new(&*tx)
                .legacy_signature_hash(idx, script, EcdsaSighashType::All.to_u32())
                .map_err(|e| BattleError::transaction(e.to_string()))?;
            let signature = bitcoin::ecdsa::Signature {
                signature: secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &secret),
                sighash_type: EcdsaSighashType::All,
            };

            tx.input[idx].script_sig = Builder::new()
                .push_slice(push_bytes(signature.to_vec())?)
                .push_key(&signing_key)
                .into_script();
            tx.input[idx].witness = Witness::default();
        }
        Some(ScriptClass::NestedP2wpkh) => {
            // Always a P2WPKH program over the compressed key.
            let compressed = CompressedPublicKey(pubkey);
            let redeem = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());

            let sighash = SighashCache::new(&*tx)
                .p2wpkh_signature_hash(idx, &redeem, prev_out.value, EcdsaSighashType::All)
                .map_err(|e| BattleError::transaction(e.to_string()))?;
            let signature = bitcoin::ecdsa::Signature {
                signature: secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &secret),
                sighash_type: EcdsaSighashType::All,
            };

            tx.input[idx].script_sig = Builder::new()
                .push_slice(push_bytes(redeem.into_bytes())?)
                .into_script();
            tx.input[idx].witness = Witness::p2wpkh(&signature, &pubkey);
        }
        Some(ScriptClass::P2wpkh) => {
            let sighash = SighashCache::new(&*tx)
                .p2wpkh_signature_hash(idx, script, prev_out.value, EcdsaSighashType::All)
                .map_err(|e| BattleError::transaction(e.to_string()))?;
            let signature = bitcoin::ecdsa::Signature {
                signature: secp.sign_ecdsa(&Message::from_digest(sighash.to_byte_array()), &secret),
                sighash_type: EcdsaSighashType::All,
            };

            tx.input[idx].script_sig = ScriptBuf::new();
            tx.input[idx].witness = Witness::p2wpkh(&signature, &pubkey);
        }
        Some(ScriptClass::P2tr) => {
            // The key-path sighash commits to every input's prevout, so this
            // must run after the transaction is fully assembled.
            let mut prevouts = Vec::with_capacity(tx.input.len());
            for (i, txin) in tx.input.iter().enumerate() {
                if i == idx {
                    prevouts.push(prev_out.clone());
                } else {
                    prevouts.push(prev_outs.prev_out(&txin.previous_output)?);
                }
            }

            let sighash = SighashCache::new(&*tx)
                .taproot_key_spend_signature_hash(
                    idx,
                    &Prevouts::All(&prevouts),
                    TapSighashType::Default,
                )
                .map_err(|e| BattleError::transaction(e.to_string()))?;

            let keypair = Keypair::from_secret_key(&secp, &secret);
            let tweaked = keypair.tap_tweak(&secp, None);
            let signature = bitcoin::taproot::Signature {
                signature: secp.sign_schnorr(
                    &Message::from_digest(sighash.to_byte_array()),
                    &tweaked.to_inner(),
                ),
                sighash_type: TapSighashType::Default,
            };

            tx.input[idx].script_sig = ScriptBuf::new();
            tx.input[idx].witness = Witness::p2tr_key_spend(&signature);
        }
        None => {
            return Err(BattleError::UnsupportedScript {
                script: script.to_hex_string(),
            })
        }
    }

    Ok(())
}

fn parse_private_key(private_key_hex: &str) -> BattleResult<SecretKey> {
    let bytes = hex::decode(private_key_hex).map_err(|e| BattleError::bad_key(e.to_string()))?;
    SecretKey::from_slice(&bytes).map_err(|e| BattleError::bad_key(e.to_string()))
}

fn push_bytes(bytes: Vec<u8>) -> BattleResult<PushBytesBuf> {
    PushBytesBuf::try_from(bytes)
        .map_err(|e| BattleError::transaction(format!("data exceeds push limit: {e}")))
}
