use crate::protocol::{now_millis, Peer};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Known peers keyed by peer id.
///
/// The lock is never held across an await point; callers iterate over a
/// [`snapshot`](PeerDirectory::snapshot) while doing I/O.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: Mutex<HashMap<String, Peer>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Peer>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or refresh a peer, stamping it as seen now. Returns `true` when
    /// the id was not known before.
    pub fn upsert(&self, peer: Peer) -> bool {
        self.upsert_at(peer, now_millis())
    }

    /// Like [`upsert`](Self::upsert) with an explicit clock reading.
    /// `last_seen_at` never moves backwards.
    pub fn upsert_at(&self, mut peer: Peer, now: u64) -> bool {
        let mut peers = self.guard();
        match peers.get(&peer.peer_id) {
            Some(existing) => {
                peer.last_seen_at = existing.last_seen_at.max(now);
                peers.insert(peer.peer_id.clone(), peer);
                false
            }
            None => {
                peer.last_seen_at = now;
                peers.insert(peer.peer_id.clone(), peer);
                true
            }
        }
    }

    /// Refresh freshness of a known peer. Unknown ids are ignored.
    pub fn touch(&self, peer_id: &str) -> bool {
        self.touch_at(peer_id, now_millis())
    }

    pub fn touch_at(&self, peer_id: &str, now: u64) -> bool {
        match self.guard().get_mut(peer_id) {
            Some(peer) => {
                peer.last_seen_at = peer.last_seen_at.max(now);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, peer_id: &str) -> Option<Peer> {
        self.guard().get(peer_id).cloned()
    }

    pub fn remove(&self, peer_id: &str) -> Option<Peer> {
        self.guard().remove(peer_id)
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        self.guard().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Remove and return every peer not heard from within `max_age`.
    pub fn evict_stale_older_than(&self, max_age: Duration) -> Vec<Peer> {
        self.evict_stale_at(max_age, now_millis())
    }

    pub fn evict_stale_at(&self, max_age: Duration, now: u64) -> Vec<Peer> {
        let cutoff = now.saturating_sub(max_age.as_millis() as u64);
        let mut peers = self.guard();
        let stale: Vec<String> = peers
            .values()
            .filter(|p| p.last_seen_at < cutoff)
            .map(|p| p.peer_id.clone())
            .collect();
        stale.iter().filter_map(|id| peers.remove(id)).collect()
    }

    /// Remove the given ids, but only those still stale at `now`: a peer that
    /// spoke up after being marked stays.
    pub fn evict_if_stale(&self, ids: &[String], max_age: Duration, now: u64) -> Vec<Peer> {
        let cutoff = now.saturating_sub(max_age.as_millis() as u64);
        let mut peers = self.guard();
        let mut evicted = Vec::new();
        for id in ids {
            if peers.get(id).is_some_and(|p| p.last_seen_at < cutoff) {
                if let Some(peer) = peers.remove(id) {
                    evicted.push(peer);
                }
            }
        }
        evicted
    }
}
