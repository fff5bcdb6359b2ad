//! Minimal VICI client.
//!
//! Speaks just enough of the IKE daemon's control protocol to issue plain
//! commands and subscribe to event streams: length-prefixed packets, a
//! packet-type byte, and a typed key-value message tree which is decoded
//! into [`serde_json::Value`] for structured logging.

mod client;
mod codec;

pub use client::ViciClient;
pub use codec::{parse_message, parse_packet, Packet, PacketType};

/// VICI failure.
#[derive(Debug, thiserror::Error)]
pub enum ViciError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("packet exceeds maximum length")]
    TooLarge,
    #[error("command unknown to the daemon: {0}")]
    UnknownCommand(String),
    #[error("event unknown to the daemon: {0}")]
    UnknownEvent(String),
    #[error("unexpected packet type {0}")]
    Unexpected(u8),
}
