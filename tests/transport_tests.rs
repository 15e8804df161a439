// Transport tests over real loopback sockets

use lanledger::crypto::generate_key;
use lanledger::transport::{TransportClient, TransportServer};
use lanledger::{EnvelopeCodec, Message, Payload, SyncError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const TIMEOUT: Duration = Duration::from_secs(2);

struct Running {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
    seen: mpsc::UnboundedReceiver<Message>,
}

async fn start_server(codec: EnvelopeCodec) -> Running {
    let server = TransportServer::bind("127.0.0.1:0", codec, TIMEOUT).await.expect("bind");
    let addr = server.local_addr();
    let (seen_tx, seen) = mpsc::unbounded_channel();
    let handler = Arc::new(move |message: Message, _remote: SocketAddr| -> Result<Message, SyncError> {
        let _ = seen_tx.send(message);
        Ok(Message::pong("server"))
    });
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(server.run(handler, shutdown.subscribe()));
    Running { addr, shutdown, task, seen }
}

#[tokio::test]
async fn test_send_and_request_roundtrip() {
    println!("🧪 Testing one-envelope-per-connection exchange...");
    let codec = EnvelopeCodec::new(generate_key());
    let mut server = start_server(codec.clone()).await;
    let client = TransportClient::new(codec, TIMEOUT);

    let msg = Message::discovery("client", "alice", 4242);
    client.send("127.0.0.1", server.addr.port(), &msg).await.expect("send");
    let got = tokio::time::timeout(TIMEOUT, server.seen.recv()).await.expect("delivered").expect("message");
    assert_eq!(got, msg);

    let reply = client.request("127.0.0.1", server.addr.port(), &Message::ping("client")).await.expect("request");
    let reply = reply.expect("server acknowledged");
    assert_eq!(reply.sender_id, "server");
    assert_eq!(reply.payload, Payload::Pong {});

    let _ = server.shutdown.send(());
    server.task.await.expect("server task");
    println!("  ✅ Fire-and-forget and request/ack both work");
}

#[tokio::test]
async fn test_garbage_does_not_stop_the_server() {
    println!("🧪 Testing malformed input isolation...");
    let codec = EnvelopeCodec::new(generate_key());
    let mut server = start_server(codec.clone()).await;

    // Plain garbage, then an envelope under a different key.
    let mut raw = TcpStream::connect(server.addr).await.expect("connect");
    raw.write_all(b"hello, is this the ledger?").await.expect("write");
    raw.shutdown().await.expect("shutdown");
    drop(raw);

    let stranger = TransportClient::new(EnvelopeCodec::new(generate_key()), TIMEOUT);
    let reply = stranger.request("127.0.0.1", server.addr.port(), &Message::ping("stranger")).await.expect("connects");
    assert!(reply.is_none(), "undecodable envelopes get no reply");

    // A silent client that never half-closes is cut off by the read timeout.
    let _idle = TcpStream::connect(server.addr).await.expect("connect");

    let client = TransportClient::new(codec, TIMEOUT);
    client.send("127.0.0.1", server.addr.port(), &Message::ping("friend")).await.expect("send");
    let got = tokio::time::timeout(TIMEOUT, server.seen.recv()).await.expect("delivered").expect("message");
    assert_eq!(got.sender_id, "friend", "only the valid envelope reached the handler");

    let _ = server.shutdown.send(());
    server.task.await.expect("server task");
    println!("  ✅ Server kept serving after bad input");
}

#[tokio::test]
async fn test_unreachable_peer_is_reported() {
    println!("🧪 Testing unreachable peers...");
    // Grab a free port and release it so nothing listens there.
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        l.local_addr().expect("addr").port()
    };
    let client = TransportClient::new(EnvelopeCodec::new(generate_key()), Duration::from_millis(500));
    match client.send("127.0.0.1", port, &Message::ping("c")).await {
        Err(SyncError::PeerUnreachable { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{port}")),
        other => panic!("expected PeerUnreachable, got {other:?}"),
    }
    println!("  ✅ Connection refusal surfaces as PeerUnreachable");
}

#[tokio::test]
async fn test_bind_conflict_is_fatal() {
    let codec = EnvelopeCodec::new(generate_key());
    let first = TransportServer::bind("127.0.0.1:0", codec.clone(), TIMEOUT).await.expect("bind");
    let taken = first.local_addr().to_string();
    assert!(matches!(TransportServer::bind(&taken, codec, TIMEOUT).await, Err(SyncError::Bind { .. })));
}

#[tokio::test]
async fn test_shutdown_closes_the_listener() {
    println!("🧪 Testing listener shutdown...");
    let codec = EnvelopeCodec::new(generate_key());
    let server = start_server(codec.clone()).await;
    let _ = server.shutdown.send(());
    tokio::time::timeout(Duration::from_secs(5), server.task).await.expect("stops in time").expect("join");

    let client = TransportClient::new(codec, Duration::from_millis(500));
    assert!(client.send("127.0.0.1", server.addr.port(), &Message::ping("late")).await.is_err());
    println!("  ✅ No connections accepted after shutdown");
}

#[tokio::test]
async fn test_blocking_handler_does_not_stall_other_connections() {
    println!("🧪 Testing a handler that blocks its thread...");
    let codec = EnvelopeCodec::new(generate_key());
    let server = TransportServer::bind("127.0.0.1:0", codec.clone(), Duration::from_secs(10)).await.expect("bind");
    let port = server.local_addr().port();

    let (release, gate) = std::sync::mpsc::channel::<()>();
    let gate = std::sync::Mutex::new(gate);
    let handler = Arc::new(move |message: Message, _remote: SocketAddr| -> Result<Message, SyncError> {
        if message.sender_id != "slow" {
            return Ok(Message::pong("fast"));
        }
        // stands in for a synchronous, fsynced ledger write
        let released = gate.lock().unwrap().recv_timeout(Duration::from_secs(5)).is_ok();
        Ok(Message::pong(if released { "released" } else { "timed-out" }))
    });
    let (shutdown, _) = broadcast::channel(1);
    tokio::spawn(server.run(handler, shutdown.subscribe()));

    let client = TransportClient::new(codec, Duration::from_secs(10));
    let slow = tokio::spawn({
        let client = client.clone();
        async move { client.request("127.0.0.1", port, &Message::ping("slow")).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let fast = client.request("127.0.0.1", port, &Message::ping("fast")).await.expect("request").expect("ack");
    assert_eq!(fast.sender_id, "fast");
    assert!(!slow.is_finished(), "slow handler is still parked");

    release.send(()).unwrap();
    let slow = slow.await.expect("join").expect("request").expect("ack");
    assert_eq!(slow.sender_id, "released", "the other connection was served while the slow one blocked");
    let _ = shutdown.send(());
    println!("  ✅ Blocking work stays off the runtime thread");
}
