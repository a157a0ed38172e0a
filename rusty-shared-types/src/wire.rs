//! Versioned binary encoding for [`MasternodeMessage`].
//!
//! Frame layout: one version byte followed by the bincode payload. Framing on
//! the socket (length prefix, magic) belongs to the transport.

use thiserror::Error;

use crate::masternode::MasternodeMessage;

pub const WIRE_VERSION: u8 = 1;

/// Largest payload accepted from a peer.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty message")]
    Empty,

    #[error("Unsupported wire version: expected {expected}, got {actual}")]
    UnsupportedVersion { expected: u8, actual: u8 },

    #[error("Message too large: {size} bytes (max: {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        CodecError::Serialization(err.to_string())
    }
}

pub fn encode_message(message: &MasternodeMessage) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge { size: payload.len(), max: MAX_MESSAGE_SIZE });
    }
    let mut bytes = Vec::with_capacity(payload.len() + 1);
    bytes.push(WIRE_VERSION);
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

pub fn decode_message(bytes: &[u8]) -> Result<MasternodeMessage, CodecError> {
    let (version, payload) = bytes.split_first().ok_or(CodecError::Empty)?;
    if *version != WIRE_VERSION {
        return Err(CodecError::UnsupportedVersion { expected: WIRE_VERSION, actual: *version });
    }
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge { size: payload.len(), max: MAX_MESSAGE_SIZE });
    }
    Ok(bincode::deserialize(payload)?)
}
