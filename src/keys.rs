//! # Key & Address Derivation
//!
//! Deterministically maps a passphrase to a secp256k1 private key and the
//! five address encodings the agent watches:
//!
//! 1. **Legacy P2PKH** over the uncompressed public key
//! 2. **Legacy P2PKH** over the compressed public key
//! 3. **P2SH** wrapping a P2WPKH redeem script over the compressed key
//! 4. **Native P2WPKH**
//! 5. **P2TR** key-path output key (BIP-341 tweak, empty script tree)
//!
//! The private key is `SHA256(passphrase)`. Derivation is a pure function of
//! the passphrase and the network; the same inputs always yield the same row.

use crate::error::{BattleError, BattleResult};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use bitcoin::{Address, Network, PublicKey};
use serde::{Deserialize, Serialize};

/// One derived record of the address table.
///
/// The serde field names double as the CSV header, so serializing a batch of
/// rows produces exactly the table format the agent loads at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRow {
    #[serde(rename = "Private Key (hex)")]
    pub private_key: String,
    #[serde(rename = "Legacy (uncompressed P2PKH)")]
    pub p2pkh_uncompressed: String,
    #[serde(rename = "Legacy (compressed P2PKH)")]
    pub p2pkh_compressed: String,
    #[serde(rename = "Script (P2SH)")]
    pub p2sh: String,
    #[serde(rename = "Segwit (P2WPKH)")]
    pub p2wpkh: String,
    #[serde(rename = "Taproot (P2TR)")]
    pub p2tr: String,
    #[serde(rename = "Password")]
    pub passphrase: String,
}

impl AddressRow {
    /// All five address encodings of this row.
    pub fn addresses(&self) -> [&str; 5] {
        [
            &self.p2pkh_uncompressed,
            &self.p2pkh_compressed,
            &self.p2sh,
            &self.p2wpkh,
            &self.p2tr,
        ]
    }
}

/// Derive the address row for a passphrase on the given network.
///
/// The SHA-256 digest of the passphrase is interpreted directly as the
/// private key. A digest outside the secp256k1 group order is rejected as
/// `BadPrivateKey` rather than reduced.
pub fn derive(passphrase: &str, network: Network) -> BattleResult<AddressRow> {
    let digest = sha256::Hash::hash(passphrase.as_bytes());
    let secret = SecretKey::from_slice(digest.as_byte_array())
        .map_err(|e| BattleError::bad_key(e.to_string()))?;

    let secp = Secp256k1::new();
    let inner = Secp256k1PublicKey::from_secret_key(&secp, &secret);
    let uncompressed = PublicKey {
        compressed: false,
        inner,
    };
    let compressed = CompressedPublicKey(inner);

    let p2pkh_uncompressed = Address::p2pkh(&uncompressed, network);
    let p2pkh_compressed = Address::p2pkh(&PublicKey::new(inner), network);
    let p2sh = Address::p2shwpkh(&compressed, network);
    let p2wpkh = Address::p2wpkh(&compressed, network);
    let p2tr = Address::p2tr(&secp, XOnlyPublicKey::from(inner), None, network);

    Ok(AddressRow {
        private_key: hex::encode(digest.as_byte_array()),
        p2pkh_uncompressed: p2pkh_uncompressed.to_string(),
        p2pkh_compressed: p2pkh_compressed.to_string(),
        p2sh: p2sh.to_string(),
        p2wpkh: p2wpkh.to_string(),
        p2tr: p2tr.to_string(),
        passphrase: passphrase.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::Scalar;
    use bitcoin::taproot::TapTweakHash;

    #[test]
    fn test_mainnet_vector() {
        let row = derive("bitcoin is awesome", Network::Bitcoin).unwrap();

        assert_eq!(
            row.private_key,
            "23d4a09295be678b21a5f1dceae1f634a69c1b41775f680ebf8165266471401b"
        );
        assert_eq!(row.p2pkh_uncompressed, "14NWDXkQwcGN1Pd9fboL8npVynD5SfyJAE");
        assert_eq!(row.p2pkh_compressed, "1JRW4d8vHZseMEtYbgJ7MwPG1TasHUUVNq");
        assert_eq!(row.p2sh, "3LtPxQEqqo1sYGF7VTEufzBUki6pFiDVa1");
        assert_eq!(row.p2wpkh, "bc1qhuwxrtqe2akhr4rz8vv97waw9g75ma4unk5vnf");
        assert_eq!(
            row.p2tr,
            "bc1pclm3u06yang46craktcg2ellcpsvuqxm33n3a2jxajq06rea7cws0vrplv"
        );
        assert_eq!(row.passphrase, "bitcoin is awesome");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive("correct horse battery staple", Network::Bitcoin).unwrap();
        let b = derive("correct horse battery staple", Network::Bitcoin).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_network_selects_prefixes() {
        let row = derive("bitcoin is awesome", Network::Regtest).unwrap();
        assert!(row.p2wpkh.starts_with("bcrt1q"));
        assert!(row.p2tr.starts_with("bcrt1p"));
        assert!(row.p2pkh_compressed.starts_with('m') || row.p2pkh_compressed.starts_with('n'));
        assert!(row.p2sh.starts_with('2'));
    }

    /// The taproot output key must equal `P + H_taptweak(P)*G` for the
    /// compressed internal key with an empty script tree.
    #[test]
    fn test_taproot_output_key_is_bip341_tweak() {
        let digest = sha256::Hash::hash(b"bitcoin is awesome");
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(digest.as_byte_array()).unwrap();
        let internal = XOnlyPublicKey::from(Secp256k1PublicKey::from_secret_key(&secp, &secret));

        let tweak = TapTweakHash::from_key_and_tweak(internal, None);
        let scalar = Scalar::from_be_bytes(tweak.to_byte_array()).unwrap();
        let (output_key, _parity) = internal.add_tweak(&secp, &scalar).unwrap();

        let row = derive("bitcoin is awesome", Network::Bitcoin).unwrap();
        let address: Address = row.p2tr.parse::<Address<_>>().unwrap().assume_checked();
        let program = address.script_pubkey();
        assert_eq!(&program.as_bytes()[2..34], &output_key.serialize()[..]);
    }
}
