use crate::metrics;
use crate::peers::PeerDirectory;
use crate::protocol::{now_millis, Message, Payload, Peer};
use crate::router::SyncEvent;
use crate::transport::TransportClient;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{Receiver, Sender};
use tokio::task::{self, JoinHandle};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub pinged: usize,
    pub alive: usize,
    pub evicted: Vec<Peer>,
}

/// One health pass: mark stale peers, ping the rest concurrently, then
/// evict what was marked. A `Pong` from the pinged peer refreshes it.
pub async fn sweep(
    client: &TransportClient,
    directory: &PeerDirectory,
    events: &Sender<SyncEvent>,
    local_id: &str,
    staleness: Duration,
) -> SweepReport {
    let cutoff = now_millis().saturating_sub(staleness.as_millis() as u64);
    let (stale, fresh): (Vec<Peer>, Vec<Peer>) =
        directory.snapshot().into_iter().partition(|p| p.last_seen_at < cutoff);

    let ping = Message::ping(local_id);
    let pings = fresh.iter().map(|peer| {
        let ping = &ping;
        async move {
            match client.request(&peer.address, peer.port, ping).await {
                Ok(Some(reply)) if reply.sender_id == peer.peer_id && matches!(reply.payload, Payload::Pong {}) => {
                    directory.touch(&peer.peer_id)
                }
                Ok(_) => false,
                Err(e) => {
                    debug!("ping to {} ({}) failed: {}", peer.peer_id, peer.endpoint(), e);
                    false
                }
            }
        }
    });
    let results = join_all(pings).await;

    let stale_ids: Vec<String> = stale.into_iter().map(|p| p.peer_id).collect();
    let evicted = directory.evict_if_stale(&stale_ids, staleness, now_millis());
    for peer in &evicted {
        info!("👋 Evicting silent peer {} ({})", peer.peer_id, peer.endpoint());
        metrics::PEERS_EVICTED.inc();
        let _ = events.send(SyncEvent::PeerEvicted(peer.clone()));
    }
    metrics::PEERS_KNOWN.set(directory.len() as i64);

    SweepReport {
        pinged: results.len(),
        alive: results.into_iter().filter(|ok| *ok).count(),
        evicted,
    }
}

pub fn spawn(
    client: TransportClient,
    directory: Arc<PeerDirectory>,
    events: Sender<SyncEvent>,
    local_id: String,
    every: Duration,
    staleness: Duration,
    mut shutdown_rx: Receiver<()>,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut timer = interval_at(Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = timer.tick() => {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        report = sweep(&client, &directory, &events, &local_id, staleness) => {
                            debug!(
                                "🩺 Health sweep: {}/{} alive, {} evicted",
                                report.alive, report.pinged, report.evicted.len()
                            );
                        }
                    }
                }
            }
        }
        debug!("health loop stopped");
    })
}
