// Library interface for the lanledger sync node
// Tests and embedders use the service, codec and ledger types from here

pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod envelope;
pub mod peers;
pub mod ledger;
pub mod storage;
pub mod keystore;
pub mod metrics;
pub mod transport;
pub mod router;
pub mod discovery;
pub mod health;
pub mod broadcast;
pub mod service;

pub use envelope::EnvelopeCodec;
pub use error::SyncError;
pub use ledger::{Ledger, MemoryLedger, Transaction, TransactionStatus, TransferError, User};
pub use peers::PeerDirectory;
pub use protocol::{Message, Payload, Peer};
pub use router::{Routed, Router, SyncEvent};
pub use service::{SyncService, SyncSettings};
pub use storage::Store;
