use thiserror::Error;

/// Failures surfaced by the sync service. Every variant except `Bind` is
/// isolated to one connection, one peer or one message.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("peer unreachable at {addr}: {reason}")]
    PeerUnreachable { addr: String, reason: String },

    #[error("invalid transaction {id}: {reason}")]
    InvalidTransaction { id: String, reason: String },

    #[error("envelope encode failed: {0}")]
    Encode(String),

    #[error("ledger failure: {0}")]
    Ledger(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sync service is shutting down")]
    ServiceStopped,
}

impl SyncError {
    /// Inbound failures that close the connection without a reply.
    pub fn is_malformed(&self) -> bool {
        matches!(self, SyncError::MalformedEnvelope(_) | SyncError::UnknownMessageType(_))
    }

    pub(crate) fn unreachable(addr: impl Into<String>, reason: impl ToString) -> Self {
        SyncError::PeerUnreachable { addr: addr.into(), reason: reason.to_string() }
    }
}
