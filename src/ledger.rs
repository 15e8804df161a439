//! Ledger records and the contract the sync service uses to read and write them.

use crate::crypto;
use crate::protocol::now_millis;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Balance a freshly created account starts with.
pub const DEFAULT_BALANCE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub from_username: String,
    pub to_username: String,
    pub amount: f64,
    pub timestamp: u64,
    pub description: String,
    pub status: TransactionStatus,
    pub signature: String,
}

impl Transaction {
    /// A new pending transfer with a random id and a digest in `signature`.
    pub fn pending(from: &str, to: &str, amount: f64, description: &str) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let timestamp = now_millis();
        let signature = crypto::transaction_digest(&id, from, to, amount, timestamp);
        Self {
            id,
            from_username: from.to_string(),
            to_username: to.to_string(),
            amount,
            timestamp,
            description: description.to_string(),
            status: TransactionStatus::Pending,
            signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub balance: f64,
    pub created_at: u64,
    pub public_key: String,
    pub peer_id: String,
}

impl User {
    pub fn new(username: impl Into<String>, balance: f64) -> Self {
        Self {
            username: username.into(),
            balance,
            created_at: now_millis(),
            public_key: String::new(),
            peer_id: String::new(),
        }
    }
}

/// How [`Ledger::apply_transfer`] treats the two parties of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Both accounts must be held here and the sender must cover the amount.
    Local,
    /// A transfer committed elsewhere. Accounts held here are adjusted when
    /// `adjust_balances` is set; accounts we do not hold are skipped.
    Remote { adjust_balances: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Recorded,
    /// The id was already in the ledger; nothing was written.
    Duplicate,
}

/// Persistent ledger as seen by the sync service.
pub trait Ledger: Send + Sync {
    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>>;
    fn upsert_transaction(&self, tx: &Transaction) -> Result<()>;
    fn get_user(&self, username: &str) -> Result<Option<User>>;
    fn put_user(&self, user: &User) -> Result<()>;
    fn update_balance(&self, username: &str, new_balance: f64) -> Result<()>;
    /// Transactions touching `username`, newest first.
    fn transactions_for_user(&self, username: &str) -> Result<Vec<Transaction>>;

    /// Record `tx` together with its balance effects, or nothing at all.
    ///
    /// The duplicate check, the funds check and every write happen inside one
    /// critical section that all balance writers of this ledger share.
    fn apply_transfer(&self, tx: &Transaction, mode: ApplyMode) -> Result<Applied, TransferError>;

    fn user_exists(&self, username: &str) -> Result<bool> {
        Ok(self.get_user(username)?.is_some())
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("sender {0} not found")]
    SenderNotFound(String),
    #[error("recipient {0} not found")]
    RecipientNotFound(String),
    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientFunds { available: f64, requested: f64 },
    #[error("invalid amount {0}")]
    InvalidAmount(f64),
    #[error("ledger failure: {0}")]
    Ledger(String),
    #[error("sync service has been shut down")]
    ServiceStopped,
}

impl From<anyhow::Error> for TransferError {
    fn from(e: anyhow::Error) -> Self {
        TransferError::Ledger(format!("{e:#}"))
    }
}

/// The account rows `tx` rewrites, given the current sender and recipient.
///
/// Pure; ledgers call it with their write lock held and persist the result
/// in the same step as the transaction record.
pub fn settle(
    tx: &Transaction,
    mode: ApplyMode,
    sender: Option<User>,
    recipient: Option<User>,
) -> Result<Vec<User>, TransferError> {
    let self_transfer = tx.from_username == tx.to_username;
    match mode {
        ApplyMode::Local => {
            let mut sender = sender.ok_or_else(|| TransferError::SenderNotFound(tx.from_username.clone()))?;
            let mut recipient = recipient.ok_or_else(|| TransferError::RecipientNotFound(tx.to_username.clone()))?;
            if sender.balance < tx.amount {
                return Err(TransferError::InsufficientFunds { available: sender.balance, requested: tx.amount });
            }
            if self_transfer {
                return Ok(Vec::new());
            }
            sender.balance -= tx.amount;
            recipient.balance += tx.amount;
            Ok(vec![sender, recipient])
        }
        ApplyMode::Remote { adjust_balances } => {
            if !adjust_balances || self_transfer {
                return Ok(Vec::new());
            }
            let mut rows = Vec::with_capacity(2);
            for (party, delta) in [(sender, -tx.amount), (recipient, tx.amount)] {
                if let Some(mut user) = party {
                    user.balance += delta;
                    rows.push(user);
                }
            }
            if rows.len() < 2 {
                tracing::debug!("transaction {} touches accounts not held here; those stay untouched", tx.id);
            }
            Ok(rows)
        }
    }
}

/// Debit `from`, credit `to` and record a COMPLETED transaction, atomically.
///
/// Validation failures leave the ledger untouched. A storage failure records
/// the transfer as FAILED (best effort) and reports the error.
pub fn commit_transfer(
    ledger: &dyn Ledger,
    from: &str,
    to: &str,
    amount: f64,
    description: &str,
) -> Result<Transaction, TransferError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(TransferError::InvalidAmount(amount));
    }

    let mut tx = Transaction::pending(from, to, amount, description);
    tx.status = TransactionStatus::Completed;
    match ledger.apply_transfer(&tx, ApplyMode::Local) {
        Ok(Applied::Recorded) => Ok(tx),
        Ok(Applied::Duplicate) => Err(TransferError::Ledger(format!("transaction id {} already recorded", tx.id))),
        Err(TransferError::Ledger(reason)) => {
            tx.status = TransactionStatus::Failed;
            if let Err(record_err) = ledger.upsert_transaction(&tx) {
                tracing::warn!("could not record failed transfer {}: {:#}", tx.id, record_err);
            }
            Err(TransferError::Ledger(reason))
        }
        Err(rejected) => Err(rejected),
    }
}

/// In-memory ledger, used by tests and by embedders without a database.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    transactions: HashMap<String, Transaction>,
    users: HashMap<String, User>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn transaction_count(&self) -> usize {
        self.state().transactions.len()
    }
}

impl Ledger for MemoryLedger {
    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        Ok(self.state().transactions.get(id).cloned())
    }

    fn upsert_transaction(&self, tx: &Transaction) -> Result<()> {
        self.state().transactions.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    fn get_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self.state().users.get(username).cloned())
    }

    fn put_user(&self, user: &User) -> Result<()> {
        self.state().users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    fn update_balance(&self, username: &str, new_balance: f64) -> Result<()> {
        match self.state().users.get_mut(username) {
            Some(user) => {
                user.balance = new_balance;
                Ok(())
            }
            None => anyhow::bail!("user {} not found", username),
        }
    }

    fn apply_transfer(&self, tx: &Transaction, mode: ApplyMode) -> Result<Applied, TransferError> {
        let mut state = self.state();
        if state.transactions.contains_key(&tx.id) {
            return Ok(Applied::Duplicate);
        }
        let sender = state.users.get(&tx.from_username).cloned();
        let recipient = state.users.get(&tx.to_username).cloned();
        for user in settle(tx, mode, sender, recipient)? {
            state.users.insert(user.username.clone(), user);
        }
        state.transactions.insert(tx.id.clone(), tx.clone());
        Ok(Applied::Recorded)
    }

    fn transactions_for_user(&self, username: &str) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self
            .state()
            .transactions
            .values()
            .filter(|t| t.from_username == username || t.to_username == username)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(txs)
    }
}
