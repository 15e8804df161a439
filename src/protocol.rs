//! Wire messages exchanged between peers.
//!
//! Every message is a flat JSON object carrying the common header
//! (`type`, `senderId`, `timestamp`) next to its variant fields, e.g.
//!
//! ```text
//! {"senderId":"a1","timestamp":1700000000000,"type":"PEER_DISCOVERY","username":"alice","port":8888}
//! ```

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TYPE_USER_SYNC: &str = "USER_SYNC";
pub const TYPE_TRANSACTION: &str = "TRANSACTION";
pub const TYPE_PEER_DISCOVERY: &str = "PEER_DISCOVERY";
pub const TYPE_PEER_RESPONSE: &str = "PEER_RESPONSE";
pub const TYPE_PING: &str = "PING";
pub const TYPE_PONG: &str = "PONG";

pub const KNOWN_TYPES: [&str; 6] = [
    TYPE_USER_SYNC,
    TYPE_TRANSACTION,
    TYPE_PEER_DISCOVERY,
    TYPE_PEER_RESPONSE,
    TYPE_PING,
    TYPE_PONG,
];

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A remote node as known to the peer directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub peer_id: String,
    pub username: String,
    pub address: String,
    pub port: u16,
    #[serde(rename = "lastSeen", default)]
    pub last_seen_at: u64,
}

impl Peer {
    pub fn new(peer_id: impl Into<String>, username: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            peer_id: peer_id.into(),
            username: username.into(),
            address: address.into(),
            port,
            last_seen_at: now_millis(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Payload {
    #[serde(rename = "USER_SYNC", rename_all = "camelCase")]
    UserSync { username: String, balance: f64, public_key: String },

    #[serde(rename = "TRANSACTION", rename_all = "camelCase")]
    TransactionBroadcast {
        transaction_id: String,
        from_username: String,
        to_username: String,
        amount: f64,
        signature: String,
    },

    #[serde(rename = "PEER_DISCOVERY")]
    PeerDiscovery { username: String, port: u16 },

    #[serde(rename = "PEER_RESPONSE")]
    PeerResponse {
        #[serde(default)]
        username: String,
        peers: Vec<Peer>,
    },

    #[serde(rename = "PING")]
    Ping {},

    #[serde(rename = "PONG")]
    Pong {},
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::UserSync { .. } => TYPE_USER_SYNC,
            Payload::TransactionBroadcast { .. } => TYPE_TRANSACTION,
            Payload::PeerDiscovery { .. } => TYPE_PEER_DISCOVERY,
            Payload::PeerResponse { .. } => TYPE_PEER_RESPONSE,
            Payload::Ping {} => TYPE_PING,
            Payload::Pong {} => TYPE_PONG,
        }
    }
}

/// A protocol message: common header plus one payload variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "senderId")]
    pub sender_id: String,
    pub timestamp: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

/// The discriminator alone; parsed first so unknown `type`s can be told
/// apart from malformed bodies.
#[derive(Debug, Deserialize)]
pub(crate) struct TypeTag {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Message {
    pub fn new(sender_id: impl Into<String>, payload: Payload) -> Self {
        Self { sender_id: sender_id.into(), timestamp: now_millis(), payload }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn ping(sender_id: impl Into<String>) -> Self {
        Self::new(sender_id, Payload::Ping {})
    }

    pub fn pong(sender_id: impl Into<String>) -> Self {
        Self::new(sender_id, Payload::Pong {})
    }

    pub fn discovery(sender_id: impl Into<String>, username: impl Into<String>, port: u16) -> Self {
        Self::new(sender_id, Payload::PeerDiscovery { username: username.into(), port })
    }
}

/// Split a `host:port` seed string. IPv6 literals may be bracketed.
pub fn parse_endpoint(endpoint: &str) -> Option<(String, u16)> {
    let (host, port) = endpoint.trim().rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok()?;
    Some((host.to_string(), port))
}
