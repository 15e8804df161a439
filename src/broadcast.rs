use crate::ledger::Transaction;
use crate::peers::PeerDirectory;
use crate::protocol::{Message, Payload};
use crate::transport::TransportClient;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub targets: usize,
    pub delivered: usize,
}

/// Fans locally committed transfers out to every known peer.
#[derive(Clone)]
pub struct BroadcastEmitter {
    local_id: String,
    directory: Arc<PeerDirectory>,
    client: TransportClient,
}

impl BroadcastEmitter {
    pub fn new(local_id: impl Into<String>, directory: Arc<PeerDirectory>, client: TransportClient) -> Self {
        Self { local_id: local_id.into(), directory, client }
    }

    pub fn message_for(&self, tx: &Transaction) -> Message {
        Message::new(
            self.local_id.clone(),
            Payload::TransactionBroadcast {
                transaction_id: tx.id.clone(),
                from_username: tx.from_username.clone(),
                to_username: tx.to_username.clone(),
                amount: tx.amount,
                signature: tx.signature.clone(),
            },
        )
    }

    /// Best-effort: one independent send per peer, failures only counted.
    pub async fn broadcast(&self, tx: &Transaction) -> BroadcastReport {
        let message = self.message_for(tx);
        let peers = self.directory.snapshot();
        let sends = peers.iter().map(|peer| {
            let message = &message;
            async move {
                match self.client.send(&peer.address, peer.port, message).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("broadcast of {} to {} failed: {}", tx.id, peer.peer_id, e);
                        false
                    }
                }
            }
        });
        let results = join_all(sends).await;
        let report = BroadcastReport {
            targets: results.len(),
            delivered: results.into_iter().filter(|ok| *ok).count(),
        };
        info!("📤 Broadcast {} to {}/{} peer(s)", tx.id, report.delivered, report.targets);
        report
    }
}
