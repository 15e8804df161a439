//! TCP transport: one envelope per connection.
//!
//! ```text
//! client                         server
//!   connect ───────────────────▶ accept
//!   write envelope, half-close ─▶ read until EOF / 8 KiB / timeout
//!                                decode → handler
//!   read ack (optional) ◀──────── write encoded reply, close
//! ```

use crate::envelope::{EnvelopeCodec, MAX_ENVELOPE_BYTES};
use crate::error::SyncError;
use crate::metrics;
use crate::protocol::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Pause after a failed `accept()` before trying again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);
/// How long in-flight connections may keep running after shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Processes one decoded inbound message. The returned message is encoded
/// and written back as the acknowledgement; an error closes the connection
/// without a reply. Runs on tokio's blocking pool, so it may do blocking I/O.
pub trait InboundHandler: Send + Sync + 'static {
    fn handle(&self, message: Message, remote: SocketAddr) -> Result<Message, SyncError>;
}

impl<F> InboundHandler for F
where
    F: Fn(Message, SocketAddr) -> Result<Message, SyncError> + Send + Sync + 'static,
{
    fn handle(&self, message: Message, remote: SocketAddr) -> Result<Message, SyncError> {
        self(message, remote)
    }
}

pub struct TransportServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    codec: EnvelopeCodec,
    read_timeout: Duration,
}

impl TransportServer {
    /// Bind the listening socket. This is the only startup-fatal step.
    pub async fn bind(addr: &str, codec: EnvelopeCodec, read_timeout: Duration) -> Result<Self, SyncError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| SyncError::Bind { addr: addr.to_string(), source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SyncError::Bind { addr: addr.to_string(), source })?;
        Ok(Self { listener, local_addr, codec, read_timeout })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until `shutdown` fires, then close the listener and give
    /// in-flight connections [`SHUTDOWN_GRACE`] to finish before aborting them.
    pub async fn run<H: InboundHandler>(self, handler: Arc<H>, mut shutdown: broadcast::Receiver<()>) {
        let TransportServer { listener, local_addr, codec, read_timeout } = self;
        let mut connections: JoinSet<()> = JoinSet::new();
        info!("📡 Listening for peers on {}", local_addr);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let codec = codec.clone();
                        let handler = handler.clone();
                        connections.spawn(handle_connection(stream, remote, codec, handler, read_timeout));
                    }
                    Err(e) => {
                        warn!("accept failed on {}: {}; retrying in {:?}", local_addr, e, ACCEPT_BACKOFF);
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!("connection handler panicked: {}", e);
                        }
                    }
                }
            }
        }

        drop(listener);
        let in_flight = connections.len();
        if in_flight > 0 {
            debug!("waiting for {} in-flight connection(s)", in_flight);
            let drained = timeout(SHUTDOWN_GRACE, async { while connections.join_next().await.is_some() {} }).await;
            if drained.is_err() {
                connections.abort_all();
            }
        }
        info!("🛑 Listener on {} closed", local_addr);
    }
}

async fn handle_connection<H: InboundHandler>(
    mut stream: TcpStream,
    remote: SocketAddr,
    codec: EnvelopeCodec,
    handler: Arc<H>,
    read_timeout: Duration,
) {
    let bytes = match read_envelope(&mut stream, read_timeout).await {
        Ok(bytes) => bytes,
        Err(e) => {
            metrics::ENVELOPES_MALFORMED.inc();
            debug!("dropping connection from {}: {}", remote, e);
            return;
        }
    };
    let message = match codec.decode(&bytes) {
        Ok(message) => message,
        Err(e) => {
            metrics::ENVELOPES_MALFORMED.inc();
            debug!("dropping envelope from {}: {}", remote, e);
            return;
        }
    };
    metrics::ENVELOPES_RECEIVED.inc();

    // handlers write to the ledger synchronously; keep that off the reactor
    let dispatched = tokio::task::spawn_blocking(move || handler.handle(message, remote)).await;
    let reply = match dispatched {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            warn!("⚠️  dispatch failed for envelope from {}: {}", remote, e);
            return;
        }
        Err(e) => {
            warn!("⚠️  handler for envelope from {} did not complete: {}", remote, e);
            return;
        }
    };
    let out = match codec.encode(&reply) {
        Ok(out) => out,
        Err(e) => {
            warn!("could not encode reply to {}: {}", remote, e);
            return;
        }
    };
    let written = timeout(read_timeout, async {
        stream.write_all(&out).await?;
        stream.shutdown().await
    })
    .await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("reply to {} not delivered: {}", remote, e),
        Err(_) => debug!("reply to {} timed out", remote),
    }
}

/// Read one envelope: until EOF, a full buffer, or the deadline. Whatever
/// arrived is handed to the codec, which rejects partial envelopes.
async fn read_envelope(stream: &mut TcpStream, read_timeout: Duration) -> Result<Vec<u8>, SyncError> {
    let mut buf = vec![0u8; MAX_ENVELOPE_BYTES];
    let mut filled = 0;
    let deadline = Instant::now() + read_timeout;
    while filled < buf.len() {
        match timeout_at(deadline, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(SyncError::MalformedEnvelope(format!("read failed: {e}"))),
            Err(_) => break,
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Outbound side: a fresh connection per message, no pooling.
#[derive(Debug, Clone)]
pub struct TransportClient {
    codec: EnvelopeCodec,
    timeout: Duration,
}

impl TransportClient {
    pub fn new(codec: EnvelopeCodec, timeout: Duration) -> Self {
        Self { codec, timeout }
    }

    /// Fire-and-forget: connect, write one envelope, close.
    pub async fn send(&self, host: &str, port: u16, message: &Message) -> Result<(), SyncError> {
        let envelope = self.codec.encode(message)?;
        let outcome = timeout(self.timeout, async {
            let mut stream = TcpStream::connect((host, port)).await?;
            stream.write_all(&envelope).await?;
            stream.shutdown().await
        })
        .await;
        flatten_outcome(host, port, outcome)
    }

    /// Like [`send`](Self::send), then wait for the peer's acknowledgement.
    /// `Ok(None)` means the peer closed without replying.
    pub async fn request(&self, host: &str, port: u16, message: &Message) -> Result<Option<Message>, SyncError> {
        let envelope = self.codec.encode(message)?;
        let outcome = timeout(self.timeout, async {
            let mut stream = TcpStream::connect((host, port)).await?;
            stream.write_all(&envelope).await?;
            stream.shutdown().await?;
            let mut reply = Vec::new();
            (&mut stream).take(MAX_ENVELOPE_BYTES as u64).read_to_end(&mut reply).await?;
            Ok::<_, std::io::Error>(reply)
        })
        .await;
        let reply = flatten_outcome(host, port, outcome)?;
        if reply.is_empty() {
            return Ok(None);
        }
        self.codec.decode(&reply).map(Some)
    }
}

fn flatten_outcome<T>(
    host: &str,
    port: u16,
    outcome: Result<std::io::Result<T>, tokio::time::error::Elapsed>,
) -> Result<T, SyncError> {
    let err = match outcome {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => SyncError::unreachable(format!("{host}:{port}"), e),
        Err(_) => SyncError::unreachable(format!("{host}:{port}"), "timed out"),
    };
    metrics::SENDS_FAILED.inc();
    Err(err)
}
