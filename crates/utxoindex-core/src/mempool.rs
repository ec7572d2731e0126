//! Mempool store — pending transactions keyed by txid with an
//! address → txid secondary index.
//!
//! Every mutation takes the single write lock, so a replace (delete then
//! insert) is atomic with respect to readers.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::types::{MempoolEntry, TxOutput};

struct Pending {
    entry: MempoolEntry,
    addresses: BTreeSet<String>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Pending>,
    by_address: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    fn remove(&mut self, txid: &str) -> Option<MempoolEntry> {
        let pending = self.entries.remove(txid)?;
        for address in &pending.addresses {
            if let Some(txids) = self.by_address.get_mut(address) {
                txids.remove(txid);
                if txids.is_empty() {
                    self.by_address.remove(address);
                }
            }
        }
        Some(pending.entry)
    }

    fn insert(&mut self, entry: MempoolEntry, addresses: BTreeSet<String>) {
        for address in &addresses {
            self.by_address
                .entry(address.clone())
                .or_default()
                .insert(entry.txid.clone());
        }
        self.entries
            .insert(entry.txid.clone(), Pending { entry, addresses });
    }
}

/// In-memory table of pending transactions.
#[derive(Default)]
pub struct MempoolStore {
    inner: RwLock<Inner>,
}

impl MempoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an entry together with every address it touches.
    pub fn insert(&self, entry: MempoolEntry, addresses: BTreeSet<String>) {
        self.replace(&entry.txid.clone(), Some((entry, addresses)));
    }

    /// Atomically delete `txid` and, if given, insert a new entry in its place.
    pub fn replace(
        &self,
        txid: &str,
        next: Option<(MempoolEntry, BTreeSet<String>)>,
    ) -> Option<MempoolEntry> {
        let mut inner = self.inner.write();
        let previous = inner.remove(txid);
        if let Some((entry, addresses)) = next {
            inner.insert(entry, addresses);
        }
        previous
    }

    pub fn remove(&self, txid: &str) -> Option<MempoolEntry> {
        self.inner.write().remove(txid)
    }

    /// Remove every listed txid under one lock. Returns the txids that were present.
    pub fn remove_many<'a, I>(&self, txids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut inner = self.inner.write();
        txids
            .into_iter()
            .filter_map(|txid| inner.remove(txid).map(|e| e.txid))
            .collect()
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.inner.read().entries.contains_key(txid)
    }

    pub fn get(&self, txid: &str) -> Option<MempoolEntry> {
        self.inner.read().entries.get(txid).map(|p| p.entry.clone())
    }

    /// All pending txids, ascending.
    pub fn txids(&self) -> Vec<String> {
        let mut txids: Vec<_> = self.inner.read().entries.keys().cloned().collect();
        txids.sort();
        txids
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Entries touching any of `addresses`, ordered by txid.
    pub fn entries_for_addresses<'a, I>(&self, addresses: I) -> Vec<MempoolEntry>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let inner = self.inner.read();
        let txids: BTreeSet<&String> = addresses
            .into_iter()
            .filter_map(|a| inner.by_address.get(a))
            .flatten()
            .collect();
        txids
            .into_iter()
            .filter_map(|txid| inner.entries.get(txid).map(|p| p.entry.clone()))
            .collect()
    }

    /// Output `vout` of pending transaction `txid`, if known.
    pub fn find_output(&self, txid: &str, vout: u32) -> Option<TxOutput> {
        let inner = self.inner.read();
        inner
            .entries
            .get(txid)?
            .entry
            .outputs
            .iter()
            .find(|o| o.index == vout)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxInput;

    fn entry(txid: &str, address: &str) -> MempoolEntry {
        MempoolEntry {
            txid: txid.into(),
            inputs: vec![TxInput::new("prev", 0)],
            outputs: vec![TxOutput {
                index: 0,
                address: Some(address.into()),
                value: 1000,
                script: "00".into(),
            }],
        }
    }

    fn addrs(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn insert_indexes_by_address() {
        let pool = MempoolStore::new();
        pool.insert(entry("t2", "A"), addrs(&["A"]));
        pool.insert(entry("t1", "B"), addrs(&["A", "B"]));

        let a = vec!["A".to_string()];
        let found: Vec<_> = pool.entries_for_addresses(&a).into_iter().map(|e| e.txid).collect();
        assert_eq!(found, vec!["t1", "t2"]);

        let c = vec!["C".to_string()];
        assert!(pool.entries_for_addresses(&c).is_empty());
    }

    #[test]
    fn replace_drops_stale_address_links() {
        let pool = MempoolStore::new();
        pool.insert(entry("t1", "A"), addrs(&["A"]));
        pool.replace("t1", Some((entry("t1", "B"), addrs(&["B"]))));

        let a = vec!["A".to_string()];
        let b = vec!["B".to_string()];
        assert!(pool.entries_for_addresses(&a).is_empty());
        assert_eq!(pool.entries_for_addresses(&b).len(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn remove_many_reports_present_only() {
        let pool = MempoolStore::new();
        pool.insert(entry("t1", "A"), addrs(&["A"]));
        pool.insert(entry("t2", "A"), addrs(&["A"]));
        let gone = pool.remove_many(&["t1".to_string(), "t9".to_string()]);
        assert_eq!(gone, vec!["t1"]);
        assert!(!pool.contains("t1"));
        assert!(pool.contains("t2"));
    }

    #[test]
    fn find_output_by_index() {
        let pool = MempoolStore::new();
        pool.insert(entry("t1", "A"), addrs(&["A"]));
        assert_eq!(pool.find_output("t1", 0).unwrap().value, 1000);
        assert!(pool.find_output("t1", 1).is_none());
        assert!(pool.find_output("tx", 0).is_none());
    }
}
