//! Confirmation reconciliation tests with scripted per-transaction responses

use async_trait::async_trait;
use nodewarden::error::RpcError;
use nodewarden::txwatch::{Contract, ContractOp, Transaction, TxEvent, TxWatcher};
use nodewarden::RpcClient;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

struct TxRpc {
    /// Confirmation count per fetch of a txid, front first; `Err` entries
    /// simulate a transport failure, exhausted scripts report confirmed
    script: Mutex<HashMap<String, VecDeque<Result<u64, ()>>>>,
    calls: Mutex<Vec<String>>,
}

impl TxRpc {
    fn new(script: &[(&str, &[Result<u64, ()>])]) -> Arc<Self> {
        let script = script
            .iter()
            .map(|(txid, fetches)| (txid.to_string(), fetches.iter().copied().collect()))
            .collect();
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn fetches_of(&self, txid: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == txid).count()
    }
}

#[async_trait]
impl RpcClient for TxRpc {
    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        assert_eq!(method, "gettransaction");
        let txid = params[0].as_str().unwrap().to_string();
        self.calls.lock().unwrap().push(txid.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&txid)
            .and_then(|fetches| fetches.pop_front())
            .unwrap_or(Ok(1));
        match next {
            Ok(confirmations) => Ok(serde_json::json!({
                "txid": txid,
                "confirmations": confirmations,
                "contracts": [],
            })),
            Err(()) => Err(RpcError::Transport("connection reset".to_string())),
        }
    }
}

fn unconfirmed(txid: &str) -> Transaction {
    Transaction {
        txid: txid.to_string(),
        confirmations: 0,
        contracts: Vec::new(),
    }
}

async fn next_event(rx: &mut UnboundedReceiver<TxEvent>) -> TxEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn assert_no_event(rx: &mut UnboundedReceiver<TxEvent>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn confirmed_fires_exactly_once() {
    let rpc = TxRpc::new(&[("aaa", &[Ok(0), Ok(1)])]);
    let (blocks_tx, blocks_rx) = watch::channel(None);
    let (watcher, mut rx) = TxWatcher::spawn(rpc.clone(), blocks_rx);

    watcher.watch_transaction(&unconfirmed("aaa"));
    assert_eq!(watcher.watched_count(), 1);

    // Still unconfirmed after the first block
    blocks_tx.send(Some(100)).unwrap();
    assert_no_event(&mut rx).await;
    assert_eq!(watcher.watched_count(), 1);

    // First confirmed observation retires the entry
    blocks_tx.send(Some(101)).unwrap();
    assert_eq!(next_event(&mut rx).await, TxEvent::Confirmed("aaa".to_string()));
    assert_eq!(watcher.watched_count(), 0);

    // Later blocks no longer touch the retired transaction
    blocks_tx.send(Some(102)).unwrap();
    assert_no_event(&mut rx).await;
    assert_eq!(rpc.fetches_of("aaa"), 2);

    watcher.shutdown();
}

#[tokio::test]
async fn missing_height_skips_reconciliation() {
    let rpc = TxRpc::new(&[]);
    let (blocks_tx, blocks_rx) = watch::channel(None);
    let (watcher, mut rx) = TxWatcher::spawn(rpc.clone(), blocks_rx);

    watcher.watch_transaction(&unconfirmed("aaa"));
    blocks_tx.send(None).unwrap();
    assert_no_event(&mut rx).await;
    assert!(rpc.calls.lock().unwrap().is_empty());
    assert_eq!(watcher.watched_count(), 1);

    watcher.shutdown();
}

#[tokio::test]
async fn refetch_failure_is_absorbed() {
    let rpc = TxRpc::new(&[("bbb", &[Err(()), Ok(3)])]);
    let (blocks_tx, blocks_rx) = watch::channel(None);
    let (watcher, mut rx) = TxWatcher::spawn(rpc.clone(), blocks_rx);

    watcher.watch_transaction(&unconfirmed("bbb"));

    // The failed refetch keeps the transaction watched
    blocks_tx.send(Some(200)).unwrap();
    assert_no_event(&mut rx).await;
    assert_eq!(watcher.watched_count(), 1);

    blocks_tx.send(Some(201)).unwrap();
    assert_eq!(next_event(&mut rx).await, TxEvent::Confirmed("bbb".to_string()));

    watcher.shutdown();
}

#[tokio::test]
async fn already_confirmed_registration_is_ignored() {
    let rpc = TxRpc::new(&[]);
    let (blocks_tx, blocks_rx) = watch::channel(None);
    let (watcher, mut rx) = TxWatcher::spawn(rpc.clone(), blocks_rx);

    let mut tx = unconfirmed("ccc");
    tx.confirmations = 4;
    watcher.watch_transaction(&tx);
    assert_eq!(watcher.watched_count(), 0);

    blocks_tx.send(Some(300)).unwrap();
    assert_no_event(&mut rx).await;
    assert!(rpc.calls.lock().unwrap().is_empty());

    watcher.shutdown();
}

#[tokio::test]
async fn batch_emits_one_balance_notification() {
    let rpc = TxRpc::new(&[]);
    let (_blocks_tx, blocks_rx) = watch::channel(None);
    let (watcher, mut rx) = TxWatcher::spawn(rpc, blocks_rx);

    let mut credit = unconfirmed("ddd");
    credit.contracts = vec![Contract {
        op: ContractOp::Credit,
        amount: 2.5,
        token: "0".to_string(),
        token_name: None,
    }];
    let mut debit = unconfirmed("eee");
    debit.confirmations = 1;
    debit.contracts = vec![Contract {
        op: ContractOp::Debit,
        amount: 1.0,
        token: "0".to_string(),
        token_name: None,
    }];

    watcher.add_transactions(vec![credit, debit]);

    // One notification covering both transactions
    let event = next_event(&mut rx).await;
    match event {
        TxEvent::BalanceChanged(changes) => {
            assert_eq!(changes.len(), 2);
            assert!((changes[0].amount - 2.5).abs() < 1e-9);
            assert!((changes[1].amount - (-1.0)).abs() < 1e-9);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_no_event(&mut rx).await;

    // Only the unconfirmed transaction joined the registry
    assert_eq!(watcher.watched_count(), 1);
    assert!(watcher.transaction("ddd").is_some());
    assert!(watcher.transaction("eee").is_some());

    watcher.shutdown();
}

#[tokio::test]
async fn cache_tracks_latest_observation() {
    let rpc = TxRpc::new(&[("fff", &[Ok(2)])]);
    let (blocks_tx, blocks_rx) = watch::channel(None);
    let (watcher, mut rx) = TxWatcher::spawn(rpc, blocks_rx);

    watcher.watch_transaction(&unconfirmed("fff"));
    blocks_tx.send(Some(400)).unwrap();
    assert_eq!(next_event(&mut rx).await, TxEvent::Confirmed("fff".to_string()));

    let cached = watcher.transaction("fff").unwrap();
    assert_eq!(cached.confirmations, 2);

    watcher.shutdown();
}
