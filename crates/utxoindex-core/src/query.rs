//! Query engine — snapshot-consistent address queries over the index and
//! mempool stores.
//!
//! A query captures the latest pointer first (waiting out an open write
//! section), then reads. If the write sequence moved while it was reading,
//! it waits for the writer again and reads once more against the new
//! snapshot. Pending rows whose txid is already confirmed are always
//! dropped, so a txid never shows up as both.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{QueryError, StoreError};
use crate::keys::{self, UnspentValue};
use crate::mempool::MempoolStore;
use crate::pointer::{LatestCell, Snapshot};
use crate::store::{prefix_end, KvStore, Table};
use crate::types::{LatestPointer, MempoolEntry};

// ─── Request ──────────────────────────────────────────────────────────────────

/// Which view of an address to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Transactions touching the address.
    #[default]
    All,
    /// Outputs paid to the address and not spent by a confirmed input.
    Unspent,
}

impl FromStr for QueryStatus {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "unspent" => Ok(Self::Unspent),
            other => Err(QueryError::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Unspent => write!(f, "unspent"),
        }
    }
}

/// Which rows to admit: confirmed, pending, or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    Blocks,
    Mempool,
    #[default]
    Any,
}

impl QuerySource {
    pub fn admits_confirmed(&self) -> bool {
        !matches!(self, Self::Mempool)
    }

    pub fn admits_pending(&self) -> bool {
        !matches!(self, Self::Blocks)
    }
}

impl FromStr for QuerySource {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocks" => Ok(Self::Blocks),
            "mempool" => Ok(Self::Mempool),
            "any" => Ok(Self::Any),
            other => Err(QueryError::InvalidSource(other.to_string())),
        }
    }
}

impl fmt::Display for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocks => write!(f, "blocks"),
            Self::Mempool => write!(f, "mempool"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// A validated address query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressQuery {
    pub addresses: BTreeSet<String>,
    pub status: QueryStatus,
    pub source: QuerySource,
    /// Exclusive lower height bound; `None` means 0.
    pub from: Option<u64>,
    /// Inclusive upper height bound; `None` means the latest height.
    pub to: Option<u64>,
}

impl AddressQuery {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: QueryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn source(mut self, source: QuerySource) -> Self {
        self.source = source;
        self
    }

    pub fn from_height(mut self, from: u64) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to_height(mut self, to: u64) -> Self {
        self.to = Some(to);
        self
    }

    /// Build a query from raw request parameters, rejecting unknown enum
    /// values and non-integer heights. Empty addresses are kept out.
    pub fn parse<I, S>(
        addresses: I,
        status: Option<&str>,
        source: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addresses = addresses
            .into_iter()
            .map(Into::into)
            .filter(|a: &String| !a.is_empty())
            .collect();
        Ok(Self {
            addresses,
            status: status.map(str::parse).transpose()?.unwrap_or_default(),
            source: source.map(str::parse).transpose()?.unwrap_or_default(),
            from: from.map(|v| parse_height("from", v)).transpose()?,
            to: to.map(|v| parse_height("to", v)).transpose()?,
        })
    }
}

fn parse_height(field: &'static str, value: &str) -> Result<u64, QueryError> {
    value.trim().parse().map_err(|_| QueryError::InvalidHeight {
        field,
        value: value.to_string(),
    })
}

// ─── Response ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRow {
    pub txid: String,
    pub height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentRow {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub script: String,
    pub height: Option<u64>,
}

/// Exactly one of `transactions` / `unspent` is set, matching the query status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<TxRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unspent: Option<Vec<UnspentRow>>,
    pub latest: LatestPointer,
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Read-only query surface. Cheap to clone; share one per process.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn KvStore>,
    mempool: Arc<MempoolStore>,
    latest: Arc<LatestCell>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn KvStore>, mempool: Arc<MempoolStore>, latest: Arc<LatestCell>) -> Self {
        Self {
            store,
            mempool,
            latest,
        }
    }

    /// The pointer a query started now would be tagged with.
    pub fn latest(&self) -> LatestPointer {
        self.latest.latest()
    }

    pub async fn query_addresses(&self, query: &AddressQuery) -> Result<QueryResponse, QueryError> {
        let snapshot = self.latest.load_settled().await;
        let response = self.read(query, &snapshot).await?;
        if self.unchanged_since(&snapshot) {
            return Ok(response);
        }

        let retry = self.latest.load_settled().await;
        debug!(
            from = snapshot.sequence,
            to = retry.sequence,
            "index moved during query, re-reading"
        );
        self.read(query, &retry).await
    }

    /// Like [`query_addresses`](Self::query_addresses), cut off after `deadline`.
    pub async fn query_with_deadline(
        &self,
        query: &AddressQuery,
        deadline: Duration,
    ) -> Result<QueryResponse, QueryError> {
        tokio::time::timeout(deadline, self.query_addresses(query))
            .await
            .map_err(|_| QueryError::DeadlineExceeded {
                ms: deadline.as_millis() as u64,
            })?
    }

    fn unchanged_since(&self, snapshot: &Snapshot) -> bool {
        !snapshot.is_writing() && self.latest.load().sequence == snapshot.sequence
    }

    async fn read(&self, query: &AddressQuery, snapshot: &Snapshot) -> Result<QueryResponse, QueryError> {
        let from = query.from.unwrap_or(0);
        let to = query.to.unwrap_or(snapshot.latest.height);
        let latest = snapshot.latest.clone();

        match query.status {
            QueryStatus::All => Ok(QueryResponse {
                transactions: Some(self.transactions(query, from, to).await?),
                unspent: None,
                latest,
            }),
            QueryStatus::Unspent => Ok(QueryResponse {
                transactions: None,
                unspent: Some(self.unspent(query, from, to).await?),
                latest,
            }),
        }
    }

    async fn transactions(&self, query: &AddressQuery, from: u64, to: u64) -> Result<Vec<TxRow>, QueryError> {
        let mut confirmed = BTreeSet::new();
        if query.source.admits_confirmed() {
            for address in &query.addresses {
                for (key, _) in self.history_in_range(address, from, to).await? {
                    let entry = keys::decode_history_key(&key)?;
                    if let Some(height) = entry.height {
                        confirmed.insert((height, entry.txid));
                    }
                }
            }
        }

        let mut rows: Vec<TxRow> = confirmed
            .into_iter()
            .map(|(height, txid)| TxRow {
                txid,
                height: Some(height),
            })
            .collect();

        if query.source.admits_pending() {
            for entry in self.pending_for(query).await? {
                rows.push(TxRow {
                    txid: entry.txid,
                    height: None,
                });
            }
        }
        Ok(rows)
    }

    async fn unspent(&self, query: &AddressQuery, from: u64, to: u64) -> Result<Vec<UnspentRow>, QueryError> {
        let mut confirmed = Vec::new();
        if query.source.admits_confirmed() {
            for address in &query.addresses {
                let prefix = keys::address_prefix(address);
                for (key, value) in self.store.scan_prefix(Table::Unspent, &prefix).await? {
                    let (_, txid, vout) = keys::decode_unspent_key(&key)?;
                    let value: UnspentValue = keys::decode(Table::Unspent, &value)?;
                    if value.height > from && value.height <= to {
                        confirmed.push((value.height, txid, vout, value.value, value.script));
                    }
                }
            }
        }
        confirmed.sort();

        let mut rows: Vec<UnspentRow> = confirmed
            .into_iter()
            .map(|(height, txid, vout, value, script)| UnspentRow {
                txid,
                vout,
                value,
                script,
                height: Some(height),
            })
            .collect();

        if query.source.admits_pending() {
            for entry in self.pending_for(query).await? {
                for output in entry.outputs {
                    let paid = output
                        .address
                        .as_ref()
                        .is_some_and(|a| query.addresses.contains(a));
                    if paid {
                        rows.push(UnspentRow {
                            txid: entry.txid.clone(),
                            vout: output.index,
                            value: output.value,
                            script: output.script,
                            height: None,
                        });
                    }
                }
            }
        }
        Ok(rows)
    }

    /// History rows for `address` with `from < height <= to`, ascending.
    async fn history_in_range(
        &self,
        address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let Some(lower) = from.checked_add(1) else {
            return Ok(Vec::new());
        };
        if lower > to {
            return Ok(Vec::new());
        }
        let prefix = keys::address_prefix(address);
        let mut start = prefix.clone();
        start.extend_from_slice(&lower.to_be_bytes());
        let end = match to.checked_add(1) {
            Some(upper) => {
                let mut end = prefix;
                end.extend_from_slice(&upper.to_be_bytes());
                Some(end)
            }
            None => prefix_end(&prefix),
        };
        self.store.range(Table::History, &start, end.as_deref()).await
    }

    /// Pending entries touching the queried addresses, minus anything the
    /// index already holds as confirmed. Ordered by txid.
    async fn pending_for(&self, query: &AddressQuery) -> Result<Vec<MempoolEntry>, StoreError> {
        let entries = self.mempool.entries_for_addresses(&query.addresses);
        let mut seen = HashSet::with_capacity(entries.len());
        let mut pending = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen.insert(entry.txid.clone()) {
                continue;
            }
            if self
                .store
                .get(Table::TxHeights, &keys::txid_key(&entry.txid))
                .await?
                .is_some()
            {
                continue;
            }
            pending.push(entry);
        }
        Ok(pending)
    }
}
