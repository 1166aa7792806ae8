//! Error types shared across the server
//!
//! Every failure a client can provoke is a [`ProtocolError`] and is contained to
//! the packet that caused it. Job and script failures are likewise contained to
//! the job or entity they belong to; nothing here is allowed to unwind into the
//! worker loop or the tick loop.

use crate::client_manager::PeerId;
use thiserror::Error;

/// Malformed or rejected client input.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame could not be read at all (empty or truncated).
    #[error("malformed frame from peer {peer}: {reason}")]
    Decode { peer: PeerId, reason: &'static str },

    /// Opcode not registered, or registered but disabled.
    #[error("unknown opcode 0x{opcode:02x} from peer {peer}")]
    UnknownOpcode { peer: PeerId, opcode: u8 },

    /// The opcode is known but its payload does not decode.
    #[error("bad payload for opcode 0x{opcode:02x}: {source}")]
    Payload {
        opcode: u8,
        #[source]
        source: bincode::Error,
    },

    /// The payload decoded but carries a value the server refuses.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },

    /// The simulation side of the server is gone (shutting down).
    #[error("simulation channel closed")]
    SimulationClosed,
}

/// Programming errors raised while wiring the command table at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("opcode 0x{0:02x} registered twice")]
    DuplicateOpcode(u8),
}

/// Failures inside a worker job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("database: {0}")]
    Database(#[from] DbError),

    #[error("result channel closed")]
    ResultChannelClosed,

    #[error("{0}")]
    Failed(String),
}

/// Errors reported by the database collaborator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DbError {
    #[error("unsupported query: {0}")]
    Unsupported(String),

    #[error("column {column} has type {found}, expected {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("missing column {0}")]
    MissingColumn(String),

    #[error("missing parameter {0}")]
    MissingParameter(usize),

    #[error("database unavailable")]
    Unavailable,
}

/// Errors reported by the script host.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("script {0} not found")]
    NotFound(String),

    #[error("script {name} failed: {reason}")]
    Runtime { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level errors surfaced to `main`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Command(#[from] CommandError),
}
