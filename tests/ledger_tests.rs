// Ledger tests: local transfers against the in-memory and the rocksdb ledger

use lanledger::ledger::{commit_transfer, DEFAULT_BALANCE};
use lanledger::{Ledger, MemoryLedger, Store, TransactionStatus, TransferError, User};
use std::sync::Arc;
use tempfile::TempDir;

fn seeded(ledger: &dyn Ledger) {
    ledger.put_user(&User::new("alice", DEFAULT_BALANCE)).expect("alice");
    ledger.put_user(&User::new("bob", 50.0)).expect("bob");
}

fn balance(ledger: &dyn Ledger, user: &str) -> f64 {
    ledger.get_user(user).expect("read").expect("exists").balance
}

fn exercise_transfers(ledger: &dyn Ledger) {
    seeded(ledger);

    let tx = commit_transfer(ledger, "alice", "bob", 250.0, "rent").expect("transfer");
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.description, "rent");
    assert_eq!(tx.signature.len(), 64, "digest travels in the signature field");
    assert_eq!(balance(ledger, "alice"), 750.0);
    assert_eq!(balance(ledger, "bob"), 300.0);
    assert_eq!(ledger.get_transaction(&tx.id).expect("read"), Some(tx.clone()));

    match commit_transfer(ledger, "bob", "alice", 1_000.0, "") {
        Err(TransferError::InsufficientFunds { available, requested }) => {
            assert_eq!(available, 300.0);
            assert_eq!(requested, 1_000.0);
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }
    assert!(matches!(commit_transfer(ledger, "carol", "bob", 1.0, ""), Err(TransferError::SenderNotFound(_))));
    assert!(matches!(commit_transfer(ledger, "alice", "carol", 1.0, ""), Err(TransferError::RecipientNotFound(_))));
    assert!(matches!(commit_transfer(ledger, "alice", "bob", 0.0, ""), Err(TransferError::InvalidAmount(_))));
    assert!(matches!(commit_transfer(ledger, "alice", "bob", f64::NAN, ""), Err(TransferError::InvalidAmount(_))));
    assert_eq!(balance(ledger, "alice"), 750.0, "rejected transfers leave balances alone");

    let second = commit_transfer(ledger, "bob", "alice", 10.0, "").expect("transfer back");
    let history = ledger.transactions_for_user("alice").expect("history");
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp >= history[1].timestamp, "newest first");
    assert!(history.iter().any(|t| t.id == second.id));
    assert!(ledger.transactions_for_user("nobody").expect("history").is_empty());
}

#[tokio::test]
async fn test_memory_ledger_transfers() {
    println!("🧪 Testing transfers on the in-memory ledger...");
    let ledger = MemoryLedger::new();
    exercise_transfers(&ledger);
    assert_eq!(ledger.transaction_count(), 2);
    println!("  ✅ Memory ledger transfer rules hold");
}

#[tokio::test]
async fn test_store_ledger_transfers() {
    println!("🧪 Testing transfers on the rocksdb ledger...");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("ledger_db");
    let store = Store::open(db_path.to_str().unwrap()).expect("Failed to open store");
    exercise_transfers(&store);
    assert_eq!(store.all_transactions().expect("scan").len(), 2);
    assert_eq!(store.all_users().expect("scan").len(), 2);
    store.close().expect("close");
    println!("  ✅ Store ledger transfer rules hold");
}

#[tokio::test]
async fn test_store_survives_reopen() {
    println!("🧪 Testing persistence across reopen...");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("reopen_db");
    let path = db_path.to_str().unwrap().to_string();

    let tx_id = {
        let store = Store::open(&path).expect("open");
        seeded(&store);
        let tx = commit_transfer(&store, "alice", "bob", 1.5, "coffee").expect("transfer");
        store.put_meta("peer_id", &"node-7".to_string()).expect("meta");
        store.close().expect("close");
        tx.id
    };

    let store = Store::open(&path).expect("reopen");
    let tx = store.get_transaction(&tx_id).expect("read").expect("persisted");
    assert_eq!(tx.amount, 1.5);
    assert_eq!(tx.description, "coffee");
    assert_eq!(balance(&store, "alice"), 998.5);
    assert_eq!(store.get_meta::<String>("peer_id").expect("meta"), Some("node-7".to_string()));
    assert_eq!(store.get_meta::<String>("missing").expect("meta"), None);
    println!("  ✅ Users, transactions and meta persist");
}

#[tokio::test]
async fn test_update_balance_of_unknown_user_fails() {
    let ledger = MemoryLedger::new();
    assert!(ledger.update_balance("ghost", 1.0).is_err());
    assert!(!ledger.user_exists("ghost").expect("lookup"));
}

// Eight workers try 200 transfers of 1.0 against a balance of 100.
async fn race_for_last_coins(ledger: Arc<dyn Ledger>) {
    ledger.put_user(&User::new("alice", 100.0)).expect("alice");
    ledger.put_user(&User::new("bob", 50.0)).expect("bob");

    let mut workers = Vec::new();
    for _ in 0..8 {
        let ledger = ledger.clone();
        workers.push(tokio::task::spawn_blocking(move || {
            let mut committed = 0;
            for _ in 0..25 {
                match commit_transfer(ledger.as_ref(), "alice", "bob", 1.0, "") {
                    Ok(_) => committed += 1,
                    Err(TransferError::InsufficientFunds { .. }) => {}
                    Err(e) => panic!("unexpected transfer error: {e}"),
                }
            }
            committed
        }));
    }
    let mut committed = 0;
    for worker in workers {
        committed += worker.await.expect("worker");
    }

    assert_eq!(committed, 100, "exactly the funded transfers go through");
    assert_eq!(balance(ledger.as_ref(), "alice"), 0.0, "never overdrawn");
    assert_eq!(balance(ledger.as_ref(), "bob"), 150.0);
    assert_eq!(ledger.transactions_for_user("alice").expect("history").len(), 100);
}

#[tokio::test]
async fn test_concurrent_transfers_never_overdraw() {
    println!("🧪 Testing racing transfers against one balance...");
    race_for_last_coins(Arc::new(MemoryLedger::new())).await;
    println!("  ✅ Funds check and debit are one step");
}

#[tokio::test]
async fn test_concurrent_transfers_never_overdraw_on_store() {
    println!("🧪 Testing racing transfers against one balance (rocksdb)...");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("overdraw_db");
    let store = Store::open(db_path.to_str().unwrap()).expect("Failed to open store");
    race_for_last_coins(Arc::new(store)).await;
    println!("  ✅ Funds check and debit are one step");
}
