//! # Error Types
//!
//! This module provides the error handling for the battle engine, signing,
//! and node communication layers.

use thiserror::Error;

/// Main error type for all agent operations
#[derive(Debug, Error)]
pub enum BattleError {
    /// Configuration errors during startup
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Bitcoin RPC communication failures
    #[error("RPC communication failed: {source}")]
    Rpc {
        #[from]
        source: bitcoincore_rpc::Error,
    },

    /// ZMQ notification transport failures
    #[error("ZMQ transport error: {source}")]
    Zmq {
        #[from]
        source: zmq::Error,
    },

    /// Address table parsing errors
    #[error("address table error: {message}")]
    AddressTable { message: String },

    /// CSV reading and writing errors
    #[error("CSV processing error: {source}")]
    Csv {
        #[from]
        source: csv::Error,
    },

    /// File I/O operations
    #[error("file operation failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Private key material that does not decode to a valid secp256k1 scalar
    #[error("invalid private key: {message}")]
    BadPrivateKey { message: String },

    /// Previous output script that is none of the four supported classes
    #[error("unsupported script class: {script}")]
    UnsupportedScript { script: String },

    /// P2PKH hash matching neither the compressed nor the uncompressed key
    #[error("public key hash does not match either compressed or uncompressed key")]
    HashMismatch,

    /// Errors during transaction construction, signing, or broadcast
    #[error("transaction error: {message}")]
    Transaction { message: String },

    /// The wallet holds no confirmed spendable output inside the funding bounds
    #[error(
        "no usable utxo in wallet. make sure that the correct wallet is loaded and \
         that you have at least one confirmed utxo with value between 0.00001 BTC and 500.1 BTC"
    )]
    NoUsableUtxo,
}

/// Result type alias for agent operations
pub type BattleResult<T> = Result<T, BattleError>;

impl BattleError {
    /// Create a configuration error with a message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transaction error with a message
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create an address table error with a message
    pub fn address_table(message: impl Into<String>) -> Self {
        Self::AddressTable {
            message: message.into(),
        }
    }

    /// Create a bad-private-key error with a message
    pub fn bad_key(message: impl Into<String>) -> Self {
        Self::BadPrivateKey {
            message: message.into(),
        }
    }
}
