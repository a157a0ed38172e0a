use rusty_shared_types::{MasternodeID, MasternodeStatus};
use thiserror::Error;

/// Misbehavior charged to a peer that relays a broadcast with a bad collateral signature.
pub const DOS_BAD_BROADCAST_SIGNATURE: u32 = 100;
/// Misbehavior charged for a ping with a bad service-key signature.
pub const DOS_BAD_PING_SIGNATURE: u32 = 33;
/// Misbehavior charged for a broadcast that changes a known masternode's collateral key.
pub const DOS_COLLATERAL_KEY_MISMATCH: u32 = 33;
/// Misbehavior charged for unsolicited or unverifiable verification replies.
pub const DOS_BAD_VERIFICATION: u32 = 20;
pub const DOS_PROTOCOL_VERSION: u32 = 10;
pub const DOS_INVALID_PORT: u32 = 10;
pub const DOS_FUTURE_TIMESTAMP: u32 = 1;

#[derive(Error, Debug)]
pub enum MasternodeError {
    #[error("Invalid signature on {what}")]
    InvalidSignature { what: &'static str, dos: u32 },

    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Duplicate entry")]
    DuplicateEntry,

    #[error("Verification of {0} timed out")]
    VerificationTimeout(std::net::SocketAddr),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Insufficient collateral confirmations: have {have}, need {need}")]
    InsufficientConfirmations { have: u32, need: u32 },

    #[error("Persisted state version mismatch: expected {expected}, found {found}")]
    PersistedStateVersionMismatch { expected: String, found: String },

    #[error("Request throttled")]
    ThrottleViolation,

    #[error("Protocol version {version} below minimum {minimum}")]
    ProtocolVersion { version: u32, minimum: u32 },

    #[error("Invalid service port {0}")]
    InvalidPort(u16),

    #[error("Timestamp {timestamp} is too far in the future (now {now})")]
    FutureTimestamp { timestamp: u64, now: u64 },

    #[error("Unknown masternode {0}")]
    UnknownMasternode(MasternodeID),

    #[error("Unknown block")]
    UnknownBlock,

    #[error("Collateral spent for {0}")]
    CollateralSpent(MasternodeID),

    #[error("Masternode {0} is {1}")]
    Banned(MasternodeID, MasternodeStatus),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MasternodeError {
    /// Misbehavior score the originating peer earns for sending the offending message.
    pub fn dos_score(&self) -> u32 {
        match self {
            MasternodeError::InvalidSignature { dos, .. } => *dos,
            MasternodeError::VerificationFailed(_) => DOS_BAD_VERIFICATION,
            MasternodeError::ProtocolVersion { .. } => DOS_PROTOCOL_VERSION,
            MasternodeError::InvalidPort(_) => DOS_INVALID_PORT,
            MasternodeError::FutureTimestamp { .. } => DOS_FUTURE_TIMESTAMP,
            _ => 0,
        }
    }
}

impl From<bincode::Error> for MasternodeError {
    fn from(err: bincode::Error) -> Self {
        MasternodeError::Serialization(err.to_string())
    }
}
