use crate::error::SyncError;
use crate::ledger::{Applied, ApplyMode, Ledger, Transaction, TransactionStatus};
use crate::metrics;
use crate::peers::PeerDirectory;
use crate::protocol::{Message, Payload, Peer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Change notifications for observers (UI, notifications, tests).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    PeerDiscovered(Peer),
    PeerEvicted(Peer),
    TransactionReceived(Transaction),
    UserSynced { sender_id: String, username: String, balance: f64 },
}

/// What routing one message did.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Nothing beyond the freshness refresh.
    Noted,
    /// A `PeerDiscovery` introduced this previously unknown peer.
    NewPeer(Peer),
    /// Peers learned from a `PeerResponse`.
    PeersLearned(usize),
    /// A remote transaction was written to the ledger.
    Applied(Transaction),
    /// The transaction id was already in the ledger; dropped.
    Duplicate(String),
    /// Our own message looped back (e.g. a seed pointing at ourselves).
    OwnMessage,
}

pub struct Router {
    local_id: String,
    directory: Arc<PeerDirectory>,
    ledger: Arc<dyn Ledger>,
    events: broadcast::Sender<SyncEvent>,
    apply_balances: bool,
}

impl Router {
    pub fn new(
        local_id: impl Into<String>,
        directory: Arc<PeerDirectory>,
        ledger: Arc<dyn Ledger>,
        events: broadcast::Sender<SyncEvent>,
        apply_balances: bool,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            directory,
            ledger,
            events,
            apply_balances,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Dispatch one decoded message received from `remote`.
    pub fn route(&self, message: &Message, remote: SocketAddr) -> Result<Routed, SyncError> {
        if message.sender_id == self.local_id {
            return Ok(Routed::OwnMessage);
        }
        debug!("📨 {} from {} ({})", message.kind(), message.sender_id, remote);

        match &message.payload {
            Payload::UserSync { username, balance, .. } => {
                let _ = self.events.send(SyncEvent::UserSynced {
                    sender_id: message.sender_id.clone(),
                    username: username.clone(),
                    balance: *balance,
                });
                Ok(Routed::Noted)
            }
            Payload::TransactionBroadcast { transaction_id, from_username, to_username, amount, signature } => {
                let tx = Transaction {
                    id: transaction_id.clone(),
                    from_username: from_username.clone(),
                    to_username: to_username.clone(),
                    amount: *amount,
                    timestamp: message.timestamp,
                    description: String::new(),
                    status: TransactionStatus::Completed,
                    signature: signature.clone(),
                };
                self.apply_remote(tx)
            }
            Payload::PeerDiscovery { username, port } => {
                let peer = Peer::new(message.sender_id.clone(), username.clone(), remote.ip().to_string(), *port);
                if self.directory.upsert(peer.clone()) {
                    info!("🤝 Discovered peer {} ({}) at {}", peer.peer_id, peer.username, peer.endpoint());
                    metrics::PEERS_KNOWN.set(self.directory.len() as i64);
                    let _ = self.events.send(SyncEvent::PeerDiscovered(peer.clone()));
                    Ok(Routed::NewPeer(peer))
                } else {
                    Ok(Routed::Noted)
                }
            }
            Payload::PeerResponse { peers, .. } => {
                let mut learned = 0;
                for peer in peers.iter().filter(|p| p.peer_id != self.local_id) {
                    if self.directory.upsert(peer.clone()) {
                        learned += 1;
                        let _ = self.events.send(SyncEvent::PeerDiscovered(peer.clone()));
                    }
                }
                if learned > 0 {
                    info!("🔗 Learned {} peer(s) from {}", learned, message.sender_id);
                    metrics::PEERS_KNOWN.set(self.directory.len() as i64);
                }
                Ok(Routed::PeersLearned(learned))
            }
            Payload::Ping {} | Payload::Pong {} => Ok(Routed::Noted),
        }
    }

    /// Idempotent apply. The duplicate check, the record and its balance
    /// effects are one ledger step; on failure nothing is written and the
    /// error is returned, so a later redelivery is applied in full.
    pub fn apply_remote(&self, tx: Transaction) -> Result<Routed, SyncError> {
        if !tx.amount.is_finite() || tx.amount <= 0.0 {
            return Err(SyncError::InvalidTransaction { id: tx.id, reason: format!("amount {}", tx.amount) });
        }

        let mode = ApplyMode::Remote { adjust_balances: self.apply_balances };
        match self.ledger.apply_transfer(&tx, mode) {
            Ok(Applied::Duplicate) => {
                debug!("duplicate transaction {} dropped", tx.id);
                metrics::TRANSACTIONS_DUPLICATE.inc();
                Ok(Routed::Duplicate(tx.id))
            }
            Ok(Applied::Recorded) => {
                metrics::TRANSACTIONS_APPLIED.inc();
                info!("💸 Applied remote transaction {}: {} → {} ({})", tx.id, tx.from_username, tx.to_username, tx.amount);
                let _ = self.events.send(SyncEvent::TransactionReceived(tx.clone()));
                Ok(Routed::Applied(tx))
            }
            Err(e) => {
                warn!("remote transaction {} not applied: {}", tx.id, e);
                Err(SyncError::Ledger(e.to_string()))
            }
        }
    }
}
