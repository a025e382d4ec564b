use std::io;
use hickory_proto::error::ProtoError;

/// Errors surfaced by registration and the multicast transport.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Missing service instance name")]
    MissingInstance,
    #[error("Missing service name")]
    MissingService,
    #[error("Missing port")]
    MissingPort,
    #[error("Missing host name")]
    MissingHost,
    #[error("Invalid static peer address: {0:?}")]
    InvalidPeer(String),
    #[error("Invalid {name}: {secs}s (must be between 1 and {max}s)")]
    InvalidInterval { name: &'static str, secs: u64, max: u64 },
    #[error("Invalid advertised address: {0:?}")]
    InvalidAddress(String),
    #[error("Unknown network interface: {0}")]
    UnknownInterface(String),
    #[error("Could not determine host IP addresses for {0}")]
    NoHostAddress(String),
    #[error("Failed to bind to any udp port")]
    NoSocket,
    #[error("Failed to join multicast group on any interface")]
    JoinFailed,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("DNS codec error: {0}")]
    Codec(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
