//! The running sync node: transport server, router and the periodic loops
//! wired together around one peer directory.

use crate::broadcast::{BroadcastEmitter, BroadcastReport};
use crate::config::Config;
use crate::crypto::SharedKey;
use crate::discovery::{self, AnnounceReport, Announcement};
use crate::envelope::EnvelopeCodec;
use crate::error::SyncError;
use crate::health::{self, SweepReport};
use crate::ledger::{self, Ledger, Transaction, TransferError};
use crate::peers::PeerDirectory;
use crate::protocol::{Message, Payload, Peer};
use crate::router::{Routed, Router, SyncEvent};
use crate::transport::{InboundHandler, TransportClient, TransportServer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Upper bound on entries in one `PeerResponse`, keeping it well under the envelope limit.
pub const MAX_PEERS_PER_RESPONSE: usize = 32;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub peer_id: String,
    pub username: String,
    /// `host:port` to listen on; port 0 picks a free one.
    pub bind: String,
    pub seeds: Vec<String>,
    pub discovery_interval: Duration,
    pub health_interval: Duration,
    pub staleness: Duration,
    pub send_timeout: Duration,
    pub read_timeout: Duration,
    pub apply_remote_balances: bool,
}

impl SyncSettings {
    pub fn new(peer_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            username: username.into(),
            bind: "0.0.0.0:8888".into(),
            seeds: Vec::new(),
            discovery_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(15),
            staleness: Duration::from_secs(60),
            send_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            apply_remote_balances: true,
        }
    }

    pub fn from_config(cfg: &Config, peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            username: cfg.node.username.clone(),
            bind: format!("{}:{}", cfg.net.bind, cfg.net.listen_port),
            seeds: cfg.net.seeds.clone(),
            discovery_interval: Duration::from_secs(cfg.peers.discovery_interval_secs.max(1)),
            health_interval: Duration::from_secs(cfg.peers.health_interval_secs.max(1)),
            staleness: Duration::from_secs(cfg.peers.staleness_secs),
            send_timeout: Duration::from_millis(cfg.net.send_timeout_ms),
            read_timeout: Duration::from_millis(cfg.net.read_timeout_ms),
            apply_remote_balances: cfg.ledger.apply_remote_balances,
        }
    }
}

pub struct SyncService {
    settings: SyncSettings,
    local_addr: SocketAddr,
    directory: Arc<PeerDirectory>,
    ledger: Arc<dyn Ledger>,
    client: TransportClient,
    emitter: BroadcastEmitter,
    seeds: Vec<(String, u16)>,
    announcement: Announcement,
    events: broadcast::Sender<SyncEvent>,
    shutdown_tx: broadcast::Sender<()>,
    stopped: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncService {
    /// Bind the listener and spawn the server, discovery and health tasks.
    /// Failing to bind is the only error; everything after runs best-effort.
    pub async fn start(settings: SyncSettings, ledger: Arc<dyn Ledger>, key: SharedKey) -> Result<Self, SyncError> {
        let codec = EnvelopeCodec::new(key);
        let server = TransportServer::bind(&settings.bind, codec.clone(), settings.read_timeout).await?;
        let local_addr = server.local_addr();

        let directory = Arc::new(PeerDirectory::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let stopped = Arc::new(AtomicBool::new(false));
        let client = TransportClient::new(codec, settings.send_timeout);
        let emitter = BroadcastEmitter::new(settings.peer_id.clone(), directory.clone(), client.clone());
        let seeds = discovery::parse_seeds(&settings.seeds);

        let router = Router::new(
            settings.peer_id.clone(),
            directory.clone(),
            ledger.clone(),
            events.clone(),
            settings.apply_remote_balances,
        );
        let inbound = Arc::new(Inbound {
            router,
            directory: directory.clone(),
            client: client.clone(),
            local_id: settings.peer_id.clone(),
            username: settings.username.clone(),
            stopped: stopped.clone(),
        });

        let announcement = Announcement {
            peer_id: settings.peer_id.clone(),
            username: settings.username.clone(),
            port: local_addr.port(),
        };

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(server.run(inbound, shutdown_tx.subscribe())));
        tasks.push(discovery::spawn(
            client.clone(),
            directory.clone(),
            seeds.clone(),
            announcement.clone(),
            settings.discovery_interval,
            shutdown_tx.subscribe(),
        ));
        tasks.push(health::spawn(
            client.clone(),
            directory.clone(),
            events.clone(),
            settings.peer_id.clone(),
            settings.health_interval,
            settings.staleness,
            shutdown_tx.subscribe(),
        ));

        info!("🚀 Sync node {} ({}) up on port {}", settings.peer_id, settings.username, local_addr.port());
        Ok(Self {
            settings,
            local_addr,
            directory,
            ledger,
            client,
            emitter,
            seeds,
            announcement,
            events,
            shutdown_tx,
            stopped,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.settings.peer_id
    }

    pub fn username(&self) -> &str {
        &self.settings.username
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.directory.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Commit a local transfer, then fan it out in the background.
    ///
    /// The returned handle resolves to the broadcast report; dropping it
    /// leaves the broadcast running.
    pub fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: f64,
        description: &str,
    ) -> Result<(Transaction, JoinHandle<BroadcastReport>), TransferError> {
        if self.is_stopped() {
            return Err(TransferError::ServiceStopped);
        }
        let tx = ledger::commit_transfer(self.ledger.as_ref(), from, to, amount, description)?;
        info!("✅ Committed {} → {} ({}) as {}", tx.from_username, tx.to_username, tx.amount, tx.id);
        let emitter = self.emitter.clone();
        let outgoing = tx.clone();
        let handle = tokio::spawn(async move { emitter.broadcast(&outgoing).await });
        Ok((tx, handle))
    }

    /// One discovery round right now, outside the timer.
    pub async fn announce_now(&self) -> AnnounceReport {
        let endpoints = discovery::targets(&self.seeds, &self.directory);
        discovery::announce_once(&self.client, &self.announcement.message(), &endpoints).await
    }

    /// One health sweep right now, outside the timer.
    pub async fn sweep_now(&self) -> SweepReport {
        health::sweep(&self.client, &self.directory, &self.events, &self.settings.peer_id, self.settings.staleness).await
    }

    /// Stop accepting, stop the loops and wait for them. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🛑 Stopping sync node {}", self.settings.peer_id);
        let _ = self.shutdown_tx.send(());
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|p| p.into_inner()));
        for task in tasks {
            if let Err(e) = task.await {
                debug!("background task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}

/// Per-envelope work done on the server side.
struct Inbound {
    router: Router,
    directory: Arc<PeerDirectory>,
    client: TransportClient,
    local_id: String,
    username: String,
    stopped: Arc<AtomicBool>,
}

impl Inbound {
    // Reply to a newcomer with the peers we already know.
    fn introduce(&self, newcomer: Peer) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let peers: Vec<Peer> = self
            .directory
            .snapshot()
            .into_iter()
            .filter(|p| p.peer_id != newcomer.peer_id)
            .take(MAX_PEERS_PER_RESPONSE)
            .collect();
        if peers.is_empty() {
            return;
        }
        let response = Message::new(
            self.local_id.clone(),
            Payload::PeerResponse { username: self.username.clone(), peers },
        );
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.send(&newcomer.address, newcomer.port, &response).await {
                debug!("peer list for {} not delivered: {}", newcomer.peer_id, e);
            }
        });
    }
}

impl InboundHandler for Inbound {
    fn handle(&self, message: Message, remote: SocketAddr) -> Result<Message, SyncError> {
        self.directory.touch(&message.sender_id);
        if let Routed::NewPeer(peer) = self.router.route(&message, remote)? {
            self.introduce(peer);
        }
        Ok(Message::pong(self.local_id.clone()))
    }
}
