// Envelope codec tests: serialize → encrypt → obfuscate and back

use lanledger::crypto::{self, generate_key};
use lanledger::envelope::{EnvelopeCodec, MAX_ENVELOPE_BYTES};
use lanledger::{Message, Payload, Peer, SyncError};

fn transfer_message() -> Message {
    Message::new(
        "node-a",
        Payload::TransactionBroadcast {
            transaction_id: "tx-42".into(),
            from_username: "alice".into(),
            to_username: "bob".into(),
            amount: 12.5,
            signature: "00ff".into(),
        },
    )
}

/// Build an envelope around arbitrary JSON, bypassing the typed encoder.
fn raw_envelope(json: &str, key: &[u8; 32]) -> Vec<u8> {
    let sealed = crypto::encrypt(json.as_bytes(), key).expect("encrypt");
    crypto::obfuscate(&sealed).expect("obfuscate")
}

#[tokio::test]
async fn test_every_message_type_survives_the_codec() {
    println!("🧪 Testing codec over every message type...");
    let codec = EnvelopeCodec::new(generate_key());
    let messages = vec![
        Message::new("n", Payload::UserSync { username: "alice".into(), balance: 999.5, public_key: "pk".into() }),
        transfer_message(),
        Message::discovery("n", "alice", 8888),
        Message::new(
            "n",
            Payload::PeerResponse { username: "alice".into(), peers: vec![Peer::new("p2", "bob", "10.0.0.2", 8888)] },
        ),
        Message::ping("n"),
        Message::pong("n"),
    ];
    for message in messages {
        let bytes = codec.encode(&message).expect("encode");
        assert!(bytes.len() <= MAX_ENVELOPE_BYTES);
        assert_eq!(codec.decode(&bytes).expect("decode"), message, "{} changed in transit", message.kind());
    }
    println!("  ✅ All six message types decode to what was encoded");
}

#[tokio::test]
async fn test_wire_field_names() {
    println!("🧪 Testing JSON field names on the wire...");
    let json = serde_json::to_value(transfer_message()).expect("json");
    assert_eq!(json["type"], "TRANSACTION");
    assert_eq!(json["senderId"], "node-a");
    assert_eq!(json["transactionId"], "tx-42");
    assert_eq!(json["fromUsername"], "alice");
    assert_eq!(json["toUsername"], "bob");

    let peers = serde_json::to_value(Message::new(
        "n",
        Payload::PeerResponse { username: String::new(), peers: vec![Peer::new("p2", "bob", "10.0.0.2", 8888)] },
    ))
    .expect("json");
    assert_eq!(peers["peers"][0]["peerId"], "p2");
    assert!(peers["peers"][0].get("lastSeen").is_some());
    println!("  ✅ camelCase names and the type discriminator are in place");
}

#[tokio::test]
async fn test_decode_rejects_garbage() {
    println!("🧪 Testing malformed envelope handling...");
    let key = generate_key();
    let codec = EnvelopeCodec::new(key);

    assert!(matches!(codec.decode(&[]), Err(SyncError::MalformedEnvelope(_))));
    assert!(matches!(codec.decode(&[1, 2, 3]), Err(SyncError::MalformedEnvelope(_))));
    assert!(matches!(codec.decode(&vec![7u8; MAX_ENVELOPE_BYTES + 1]), Err(SyncError::MalformedEnvelope(_))));

    // Right framing, wrong key.
    let foreign = EnvelopeCodec::new(generate_key()).encode(&Message::ping("x")).expect("encode");
    let err = codec.decode(&foreign).expect_err("foreign key");
    assert!(err.is_malformed());

    // Valid crypto, invalid JSON.
    let not_json = raw_envelope("definitely not json", &key);
    assert!(matches!(codec.decode(&not_json), Err(SyncError::MalformedEnvelope(_))));

    // Known type, missing fields.
    let partial = raw_envelope(r#"{"type":"TRANSACTION","senderId":"x","timestamp":1}"#, &key);
    assert!(matches!(codec.decode(&partial), Err(SyncError::MalformedEnvelope(_))));
    println!("  ✅ Empty, short, oversize, foreign and invalid envelopes rejected");
}

#[tokio::test]
async fn test_unknown_type_is_distinguished() {
    println!("🧪 Testing unknown message types...");
    let key = generate_key();
    let codec = EnvelopeCodec::new(key);
    let envelope = raw_envelope(r#"{"type":"GOSSIP","senderId":"x","timestamp":1}"#, &key);
    match codec.decode(&envelope) {
        Err(SyncError::UnknownMessageType(kind)) => assert_eq!(kind, "GOSSIP"),
        other => panic!("expected UnknownMessageType, got {other:?}"),
    }
    println!("  ✅ GOSSIP reported as unknown, not malformed");
}

#[tokio::test]
async fn test_extra_fields_are_tolerated() {
    println!("🧪 Testing forward-compatible decoding...");
    let key = generate_key();
    let codec = EnvelopeCodec::new(key);
    let envelope = raw_envelope(
        r#"{"type":"PEER_DISCOVERY","senderId":"x","timestamp":5,"username":"carol","port":9000,"extra":true}"#,
        &key,
    );
    let message = codec.decode(&envelope).expect("decode");
    assert_eq!(message.sender_id, "x");
    assert_eq!(message.payload, Payload::PeerDiscovery { username: "carol".into(), port: 9000 });
    println!("  ✅ Unknown fields ignored");
}

#[tokio::test]
async fn test_oversized_message_is_refused_at_encode() {
    println!("🧪 Testing the 8 KiB envelope limit...");
    let codec = EnvelopeCodec::new(generate_key());
    let peers: Vec<Peer> = (0..200)
        .map(|i| Peer::new(format!("peer-with-a-long-identifier-{i:04}"), format!("user{i}"), "192.168.100.200", 8888))
        .collect();
    let message = Message::new("n", Payload::PeerResponse { username: "n".into(), peers });
    assert!(matches!(codec.encode(&message), Err(SyncError::Encode(_))));
    println!("  ✅ Oversized PeerResponse refused before it reaches the wire");
}
