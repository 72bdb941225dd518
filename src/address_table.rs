//! # Address Table
//!
//! Loads the CSV table mapping every watched address to its private key, and
//! writes tables produced by the generator. One row carries five address
//! encodings of the same key, so the lookup map holds five entries per row.
//!
//! The loader is strict about the header (seven columns, with the private key
//! and legacy address columns in the expected positions) and lenient about
//! individual rows: malformed rows are logged and skipped.

use crate::error::{BattleError, BattleResult};
use crate::keys::AddressRow;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const COLUMN_COUNT: usize = 7;

/// Immutable address -> hex private key lookup, populated once at startup.
#[derive(Debug, Default)]
pub struct AddressTable {
    map: HashMap<String, String>,
}

impl AddressTable {
    /// Load the table from a CSV file.
    pub fn load(path: impl AsRef<Path>) -> BattleResult<AddressTable> {
        let path = path.as_ref();
        let rows = load_rows(path)?;
        let table = AddressTable::from_rows(&rows);
        info!(
            addresses = table.len(),
            file = %path.display(),
            "loaded watched addresses"
        );
        Ok(table)
    }

    /// Build the lookup map from parsed rows.
    pub fn from_rows(rows: &[AddressRow]) -> AddressTable {
        let mut map = HashMap::with_capacity(rows.len() * 5);
        for row in rows {
            for address in row.addresses() {
                map.insert(address.to_string(), row.private_key.clone());
            }
        }
        AddressTable { map }
    }

    /// Hex private key for a watched address, if the address is ours.
    pub fn get(&self, address: &str) -> Option<&str> {
        self.map.get(address).map(String::as_str)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.map.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Read address rows from a CSV file, validating the header first.
pub fn load_rows(path: impl AsRef<Path>) -> BattleResult<Vec<AddressRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path.as_ref())?;

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record?,
        None => return Err(BattleError::address_table("empty address file")),
    };
    validate_header(&header)?;

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.len() != COLUMN_COUNT {
            warn!(columns = record.len(), "skipping malformed address row");
            continue;
        }
        let row: AddressRow = record
            .deserialize(None)
            .map_err(|e| BattleError::address_table(e.to_string()))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Write address rows to a CSV file with the canonical header.
pub fn save_rows(path: impl AsRef<Path>, rows: &[AddressRow]) -> BattleResult<()> {
    let mut writer = WriterBuilder::new().from_path(path.as_ref())?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn validate_header(header: &StringRecord) -> BattleResult<()> {
    let first = header.get(0).unwrap_or_default();
    let second = header.get(1).unwrap_or_default();
    if header.len() != COLUMN_COUNT || !first.contains("Private Key") || !second.contains("P2PKH") {
        return Err(BattleError::address_table(format!(
            "unexpected CSV header format: {header:?}"
        )));
    }
    Ok(())
}
