//! Transaction confirmation reconciliation
//!
//! Unconfirmed transactions are registered in a map keyed by txid. Every
//! block-height change event refetches the watched transactions, updates the
//! in-memory cache, and retires each entry exactly once on its first
//! confirmed observation, emitting the trigger for a dependent
//! account-balance refresh. Refetch failures are absorbed per entry.

use crate::error::RpcError;
use crate::rpc::{call_as, RpcClient};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Contract operation kinds that affect balances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractOp {
    Credit,
    Coinbase,
    Trust,
    Genesis,
    Trustpool,
    Genesispool,
    Migrate,
    Debit,
    Fee,
    Legacy,
    /// Any operation with no balance effect
    #[serde(other)]
    Other,
}

/// Sign of a contract's balance effect: +1, -1, or 0 (excluded)
pub fn delta_sign(op: ContractOp) -> i32 {
    match op {
        ContractOp::Credit
        | ContractOp::Coinbase
        | ContractOp::Trust
        | ContractOp::Genesis
        | ContractOp::Trustpool
        | ContractOp::Genesispool
        | ContractOp::Migrate => 1,
        ContractOp::Debit | ContractOp::Fee | ContractOp::Legacy => -1,
        ContractOp::Other => 0,
    }
}

/// One contract operation inside a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(rename = "OP")]
    pub op: ContractOp,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub token_name: Option<String>,
}

/// Transaction record as reported by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub contracts: Vec<Contract>,
}

impl Transaction {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }
}

/// Signed balance delta for one token, keyed by token name when present
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub token: String,
    pub token_name: Option<String>,
    pub amount: f64,
}

/// Group a transaction's contract deltas by token identity
///
/// Zero-sign and zero-amount operations contribute nothing.
pub fn balance_changes(tx: &Transaction) -> Vec<BalanceChange> {
    let mut changes: Vec<BalanceChange> = Vec::new();
    for contract in &tx.contracts {
        let sign = delta_sign(contract.op);
        if sign == 0 || contract.amount == 0.0 {
            continue;
        }
        let amount = sign as f64 * contract.amount;
        let existing = changes.iter_mut().find(|change| {
            if let Some(name) = &contract.token_name {
                change.token_name.as_ref() == Some(name)
            } else {
                change.token == contract.token
            }
        });
        match existing {
            Some(change) => change.amount += amount,
            None => changes.push(BalanceChange {
                token: contract.token.clone(),
                token_name: contract.token_name.clone(),
                amount,
            }),
        }
    }
    changes
}

/// Events delivered to the reconciliation consumer
#[derive(Debug, Clone, PartialEq)]
pub enum TxEvent {
    /// A watched transaction was observed confirmed for the first time;
    /// the consumer should refresh account balances
    Confirmed(String),
    /// Signed balance deltas for a batch of newly observed transactions.
    /// At most one per batch, not one per block.
    BalanceChanged(Vec<BalanceChange>),
}

struct TxShared {
    rpc: Arc<dyn RpcClient>,
    /// Watch registry; at most one entry per txid, removed exactly once
    watched: Mutex<HashSet<String>>,
    /// Best-effort in-memory transaction cache
    cache: Mutex<HashMap<String, Transaction>>,
    events: mpsc::UnboundedSender<TxEvent>,
}

/// Handle to the reconciliation task
pub struct TxWatcher {
    shared: Arc<TxShared>,
    handle: JoinHandle<()>,
}

impl TxWatcher {
    /// Spawn the reconciliation loop against a block-height change feed
    pub fn spawn(
        rpc: Arc<dyn RpcClient>,
        blocks: watch::Receiver<Option<u64>>,
    ) -> (Self, mpsc::UnboundedReceiver<TxEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(TxShared {
            rpc,
            watched: Mutex::new(HashSet::new()),
            cache: Mutex::new(HashMap::new()),
            events,
        });
        let handle = tokio::spawn(run(shared.clone(), blocks));
        (Self { shared, handle }, rx)
    }

    /// Register a transaction for confirmation tracking.
    /// Confirmed transactions and duplicate registrations are ignored.
    pub fn watch_transaction(&self, tx: &Transaction) {
        if tx.is_confirmed() {
            return;
        }
        let mut watched = self.shared.watched.lock().unwrap();
        if watched.insert(tx.txid.clone()) {
            log::debug!("Watching transaction {} for confirmation", tx.txid);
        }
    }

    /// Cache a batch of newly observed transactions, register the unconfirmed
    /// ones, and emit at most one balance-change notification for the batch
    pub fn add_transactions(&self, transactions: Vec<Transaction>) {
        let mut batch_changes = Vec::new();
        for tx in transactions {
            if !tx.is_confirmed() {
                self.watch_transaction(&tx);
            }
            batch_changes.extend(balance_changes(&tx));
            self.shared.cache.lock().unwrap().insert(tx.txid.clone(), tx);
        }
        if !batch_changes.is_empty() {
            let _ = self.shared.events.send(TxEvent::BalanceChanged(batch_changes));
        }
    }

    /// Cached record for a transaction, if any
    pub fn transaction(&self, txid: &str) -> Option<Transaction> {
        self.shared.cache.lock().unwrap().get(txid).cloned()
    }

    /// Number of transactions currently watched
    pub fn watched_count(&self) -> usize {
        self.shared.watched.lock().unwrap().len()
    }

    /// Stop the reconciliation loop; idempotent
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for TxWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn fetch_transaction(rpc: &dyn RpcClient, txid: &str) -> Result<Transaction, RpcError> {
    call_as(rpc, "gettransaction", vec![serde_json::json!(txid)]).await
}

async fn run(shared: Arc<TxShared>, mut blocks: watch::Receiver<Option<u64>>) {
    while blocks.changed().await.is_ok() {
        let height = *blocks.borrow_and_update();
        // No block information means the daemon is most likely disconnected
        let Some(height) = height else { continue };

        let txids: Vec<String> = shared.watched.lock().unwrap().iter().cloned().collect();
        if txids.is_empty() {
            continue;
        }
        log::debug!("Block {}: reconciling {} watched transactions", height, txids.len());

        for txid in txids {
            match fetch_transaction(&*shared.rpc, &txid).await {
                Ok(tx) => {
                    let confirmed = tx.is_confirmed();
                    shared.cache.lock().unwrap().insert(txid.clone(), tx);
                    // remove() returning true guards the exactly-once removal
                    // even when block events race the refetch
                    if confirmed && shared.watched.lock().unwrap().remove(&txid) {
                        log::info!("Transaction {} confirmed", txid);
                        let _ = shared.events.send(TxEvent::Confirmed(txid));
                    }
                }
                Err(e) => {
                    log::debug!("Refetch of {} failed: {}", txid, e);
                }
            }
        }
    }
}
