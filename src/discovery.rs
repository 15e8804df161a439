//! Periodic self-announcement to seed addresses and known peers.

use crate::peers::PeerDirectory;
use crate::protocol::{parse_endpoint, Message};
use crate::transport::TransportClient;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::task::{self, JoinHandle};
use tokio::time::interval;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceReport {
    pub attempted: usize,
    pub delivered: usize,
}

/// Parse `host:port` seeds, dropping (and logging) malformed entries.
pub fn parse_seeds(seeds: &[String]) -> Vec<(String, u16)> {
    seeds
        .iter()
        .filter_map(|seed| {
            let parsed = parse_endpoint(seed);
            if parsed.is_none() {
                warn!("ignoring malformed seed address '{}'", seed);
            }
            parsed
        })
        .collect()
}

/// Seeds plus every directory peer, without duplicates.
pub fn targets(seeds: &[(String, u16)], directory: &PeerDirectory) -> Vec<(String, u16)> {
    let mut seen = HashSet::new();
    seeds
        .iter()
        .cloned()
        .chain(directory.snapshot().into_iter().map(|p| (p.address, p.port)))
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

/// Send `announcement` to every target concurrently. Failures are logged
/// and counted, never raised.
pub async fn announce_once(
    client: &TransportClient,
    announcement: &Message,
    targets: &[(String, u16)],
) -> AnnounceReport {
    let sends = targets.iter().map(|(host, port)| async move {
        match client.send(host, *port, announcement).await {
            Ok(()) => true,
            Err(e) => {
                debug!("announce to {}:{} failed: {}", host, port, e);
                false
            }
        }
    });
    let results = join_all(sends).await;
    AnnounceReport {
        attempted: results.len(),
        delivered: results.into_iter().filter(|ok| *ok).count(),
    }
}

/// Identity this node announces.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub peer_id: String,
    pub username: String,
    pub port: u16,
}

impl Announcement {
    pub fn message(&self) -> Message {
        Message::discovery(self.peer_id.clone(), self.username.clone(), self.port)
    }
}

pub fn spawn(
    client: TransportClient,
    directory: Arc<PeerDirectory>,
    seeds: Vec<(String, u16)>,
    me: Announcement,
    every: Duration,
    mut shutdown_rx: Receiver<()>,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut timer = interval(every);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = timer.tick() => {
                    let endpoints = targets(&seeds, &directory);
                    let message = me.message();
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        report = announce_once(&client, &message, &endpoints) => {
                            debug!("📣 Announced to {}/{} target(s)", report.delivered, report.attempted);
                        }
                    }
                }
            }
        }
        debug!("discovery loop stopped");
    })
}
