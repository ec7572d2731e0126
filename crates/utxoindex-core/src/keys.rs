//! Key layouts and record encodings for the index tables.
//!
//! Keys are built so that lexicographic byte order is the order queries want:
//! heights are big-endian, and addresses are NUL-terminated so one address
//! can never be a prefix of another's rows.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::Table;
use crate::types::{AddressHistoryEntry, BlockHeader, UnspentEntry};

const SEP: u8 = 0;

// ─── Keys ─────────────────────────────────────────────────────────────────────

pub fn height_key(height: u64) -> Vec<u8> {
    height.to_be_bytes().to_vec()
}

pub fn decode_height_key(table: Table, key: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = key.try_into().map_err(|_| corrupt(table, "height key is not 8 bytes"))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Prefix of every history or unspent row for `address`.
pub fn address_prefix(address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(address.len() + 1);
    key.extend_from_slice(address.as_bytes());
    key.push(SEP);
    key
}

/// `address \0 height(be64) txid`
pub fn history_key(address: &str, height: u64, txid: &str) -> Vec<u8> {
    let mut key = address_prefix(address);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(txid.as_bytes());
    key
}

pub fn decode_history_key(key: &[u8]) -> Result<AddressHistoryEntry, StoreError> {
    let (address, rest) = split_address(Table::History, key)?;
    if rest.len() < 8 {
        return Err(corrupt(Table::History, "key too short for height"));
    }
    let (height, txid) = rest.split_at(8);
    let height = decode_height_key(Table::History, height)?;
    Ok(AddressHistoryEntry {
        address,
        txid: utf8(Table::History, txid)?,
        height: Some(height),
    })
}

/// `address \0 txid \0 vout(be32)`
pub fn unspent_key(address: &str, txid: &str, vout: u32) -> Vec<u8> {
    let mut key = address_prefix(address);
    key.extend_from_slice(txid.as_bytes());
    key.push(SEP);
    key.extend_from_slice(&vout.to_be_bytes());
    key
}

/// Returns `(address, txid, vout)`.
pub fn decode_unspent_key(key: &[u8]) -> Result<(String, String, u32), StoreError> {
    let (address, rest) = split_address(Table::Unspent, key)?;
    if rest.len() < 5 || rest[rest.len() - 5] != SEP {
        return Err(corrupt(Table::Unspent, "malformed txid/vout suffix"));
    }
    let (txid, tail) = rest.split_at(rest.len() - 5);
    let vout: [u8; 4] = tail[1..]
        .try_into()
        .map_err(|_| corrupt(Table::Unspent, "vout is not 4 bytes"))?;
    Ok((address, utf8(Table::Unspent, txid)?, u32::from_be_bytes(vout)))
}

/// `txid \0 vout(be32)`
pub fn outpoint_key(txid: &str, vout: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(txid.len() + 5);
    key.extend_from_slice(txid.as_bytes());
    key.push(SEP);
    key.extend_from_slice(&vout.to_be_bytes());
    key
}

pub fn txid_key(txid: &str) -> Vec<u8> {
    txid.as_bytes().to_vec()
}

fn split_address(table: Table, key: &[u8]) -> Result<(String, &[u8]), StoreError> {
    let pos = key
        .iter()
        .position(|b| *b == SEP)
        .ok_or_else(|| corrupt(table, "missing address terminator"))?;
    Ok((utf8(table, &key[..pos])?, &key[pos + 1..]))
}

fn utf8(table: Table, bytes: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| corrupt(table, &e.to_string()))
}

fn corrupt(table: Table, reason: &str) -> StoreError {
    StoreError::Corrupt {
        table: table.name(),
        reason: reason.to_string(),
    }
}

// ─── Records ──────────────────────────────────────────────────────────────────

/// Value of an unspent row; the key carries address, txid and vout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentValue {
    pub value: u64,
    pub script: String,
    pub height: u64,
}

impl UnspentValue {
    pub fn into_entry(self, address: String, txid: String, output_index: u32) -> UnspentEntry {
        UnspentEntry {
            address,
            txid,
            output_index,
            value: self.value,
            script: self.script,
            height: self.height,
        }
    }
}

impl From<&UnspentEntry> for UnspentValue {
    fn from(entry: &UnspentEntry) -> Self {
        Self {
            value: entry.value,
            script: entry.script.clone(),
            height: entry.height,
        }
    }
}

/// Everything needed to undo one applied block exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoRecord {
    pub hash: String,
    /// Unspent rows the block consumed, in input order.
    pub spent: Vec<UnspentEntry>,
    /// Unspent rows the block created: `(address, txid, vout)`.
    pub created: Vec<(String, String, u32)>,
    /// History rows the block created: `(address, txid)`.
    pub history: Vec<(String, String)>,
    /// Every txid the block confirmed, in block order.
    pub txids: Vec<String>,
    /// Non-coinbase txids that may go back to the pending pool on rollback.
    pub demotable: Vec<String>,
}

pub fn encode<T: Serialize>(table: Table, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| corrupt(table, &e.to_string()))
}

pub fn decode<T: DeserializeOwned>(table: Table, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| corrupt(table, &e.to_string()))
}

pub fn decode_header(bytes: &[u8]) -> Result<BlockHeader, StoreError> {
    decode(Table::Headers, bytes)
}
