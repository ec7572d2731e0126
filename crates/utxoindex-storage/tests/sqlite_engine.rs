//! The sync loop running on SQLite produces exactly the state it produces
//! in memory, and resumes from it after a restart.

#![cfg(feature = "sqlite")]

use std::sync::Arc;

use utxoindex_core::testing::{coinbase, transfer, MockNode};
use utxoindex_core::{AddressQuery, IndexerBuilder, KvStore, MemoryStore, QueryStatus, Table};
use utxoindex_storage::SqliteStore;

async fn dump(store: &dyn KvStore) -> Vec<(Table, Vec<(Vec<u8>, Vec<u8>)>)> {
    let mut out = Vec::new();
    for table in Table::ALL {
        out.push((table, store.range(table, &[], None).await.unwrap()));
    }
    out
}

fn chain() -> MockNode {
    let node = MockNode::new();
    node.mine(vec![]);
    node.mine(vec![coinbase("c0", "A", 50)]);
    node.mine(vec![coinbase("c1", "B", 50)]);
    node.mine(vec![
        coinbase("c2", "miner", 50),
        transfer("t1", &[("c0", 0)], &[("B", 20), ("C", 30)]),
    ]);
    node.mine(vec![
        coinbase("c3", "miner", 50),
        transfer("t2", &[("t1", 1)], &[("A", 30)]),
    ]);
    node
}

#[tokio::test]
async fn sqlite_state_matches_memory_state_across_a_reorg() {
    let node = chain();
    let memory = Arc::new(MemoryStore::new());
    let sqlite = Arc::new(SqliteStore::in_memory().await.unwrap());

    let mut on_memory = IndexerBuilder::new().window_size(10).build(node.clone(), memory.clone());
    let mut on_sqlite = IndexerBuilder::new().window_size(10).build(node.clone(), sqlite.clone());
    on_memory.poll_once().await.unwrap();
    on_sqlite.poll_once().await.unwrap();
    assert_eq!(dump(memory.as_ref()).await, dump(sqlite.as_ref()).await);

    node.reorg_to(2);
    node.mine(vec![coinbase("c2b", "miner", 50)]);
    node.mine(vec![coinbase("c3b", "miner", 50)]);
    node.mine(vec![coinbase("c4b", "miner", 50)]);
    let a = on_memory.poll_once().await.unwrap();
    let b = on_sqlite.poll_once().await.unwrap();
    assert_eq!(a.reorgs, 1);
    assert_eq!(b.reorgs, 1);
    assert_eq!(dump(memory.as_ref()).await, dump(sqlite.as_ref()).await);

    let unspent = on_sqlite
        .query_engine()
        .query_addresses(&AddressQuery::new(["A"]).status(QueryStatus::Unspent))
        .await
        .unwrap();
    let rows = unspent.unspent.unwrap();
    assert_eq!(rows.len(), 1, "c0 restored once t1 was rolled back");
    assert_eq!(rows[0].txid, "c0");
    assert_eq!(unspent.latest.height, 5);
}

#[tokio::test]
async fn restart_resumes_from_stored_tip() {
    let node = chain();
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());

    let mut first = IndexerBuilder::new().window_size(3).build(node.clone(), store.clone());
    first.poll_once().await.unwrap();
    let before = first.latest();
    drop(first);

    let mut second = IndexerBuilder::new().window_size(3).build(node.clone(), store.clone());
    second.bootstrap().await.unwrap();
    assert_eq!(second.latest(), before);
    assert_eq!(second.tracker().len(), 3);

    node.mine(vec![coinbase("c4", "A", 50)]);
    let report = second.poll_once().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(second.latest().height, 5);

    let history = second
        .query_engine()
        .query_addresses(&AddressQuery::new(["A"]))
        .await
        .unwrap()
        .transactions
        .unwrap();
    let txids: Vec<&str> = history.iter().map(|r| r.txid.as_str()).collect();
    assert_eq!(txids, vec!["c0", "t1", "t2", "c4"]);
}
