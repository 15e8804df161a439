use crate::crypto::{self, SharedKey};
use crate::error::SyncError;
use crate::protocol::{Message, TypeTag, KNOWN_TYPES};
use zeroize::Zeroizing;

/// Upper bound for one envelope; a connection carries exactly one.
pub const MAX_ENVELOPE_BYTES: usize = 8 * 1024;

/// serialize → encrypt → obfuscate, and back.
#[derive(Clone)]
pub struct EnvelopeCodec {
    key: Zeroizing<SharedKey>,
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec").finish_non_exhaustive()
    }
}

impl EnvelopeCodec {
    pub fn new(key: SharedKey) -> Self {
        Self { key: Zeroizing::new(key) }
    }

    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, SyncError> {
        let json = serde_json::to_vec(message).map_err(|e| SyncError::Encode(e.to_string()))?;
        let ciphertext = crypto::encrypt(&json, &self.key).map_err(|e| SyncError::Encode(e.to_string()))?;
        let envelope = crypto::obfuscate(&ciphertext).map_err(|e| SyncError::Encode(e.to_string()))?;
        if envelope.len() > MAX_ENVELOPE_BYTES {
            return Err(SyncError::Encode(format!(
                "{} envelope is {} bytes, limit is {}",
                message.kind(),
                envelope.len(),
                MAX_ENVELOPE_BYTES
            )));
        }
        Ok(envelope)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Message, SyncError> {
        if bytes.is_empty() {
            return Err(SyncError::MalformedEnvelope("empty envelope".into()));
        }
        if bytes.len() > MAX_ENVELOPE_BYTES {
            return Err(SyncError::MalformedEnvelope(format!("{} bytes exceeds envelope limit", bytes.len())));
        }
        let ciphertext = crypto::deobfuscate(bytes).map_err(|e| SyncError::MalformedEnvelope(e.to_string()))?;
        let json = crypto::decrypt(&ciphertext, &self.key).map_err(|e| SyncError::MalformedEnvelope(e.to_string()))?;

        let tag: TypeTag = serde_json::from_slice(&json)
            .map_err(|e| SyncError::MalformedEnvelope(format!("missing message type: {e}")))?;
        if !KNOWN_TYPES.contains(&tag.kind.as_str()) {
            return Err(SyncError::UnknownMessageType(tag.kind));
        }
        serde_json::from_slice(&json)
            .map_err(|e| SyncError::MalformedEnvelope(format!("invalid {} body: {e}", tag.kind)))
    }
}
