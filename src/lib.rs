//! # rbfbattle: Adversarial Mempool Agent
//!
//! Watches a Bitcoin node's mempool for transactions touching a large set of
//! weak-passphrase addresses, races anyone sweeping them with Replace-By-Fee
//! transactions, and burns contested outputs once winning costs more than
//! the prize.
//!
//! Core library for the `rbfbattle` agent and the `gen-addresses` table
//! generator.

pub mod address_table;
pub mod config;
pub mod engine;
pub mod error;
pub mod fees;
pub mod keys;
pub mod services;
pub mod signer;
pub mod tx_record;

// Re-export commonly used types
pub use engine::{Classification, Engine};
pub use error::{BattleError, BattleResult};
pub use services::{NodeApi, NodeClient};
