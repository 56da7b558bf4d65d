use std::io;

use thiserror::Error;

use super::{ConnectionState, ConnectionType};

/// Errors raised by connections and connection descriptions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The transport handshake with the remote end failed
    #[error("Failed to connect to {description}: {reason}")]
    Connect { description: String, reason: String },

    /// Address in use, missing permissions or a bad address
    #[error("Failed to listen on {description}: {reason}")]
    Listen { description: String, reason: String },

    #[error("Failed to accept a connection on {description}: {reason}")]
    Accept { description: String, reason: String },

    #[error("Failed to write {size} bytes: {reason}")]
    Write { size: usize, reason: String },

    #[error("Failed to read {size} bytes: {reason}")]
    Read { size: usize, reason: String },

    /// The remote end closed the connection in an orderly way
    #[error("Connection closed")]
    Closed,

    /// Operation not allowed in the current connection state
    #[error("Cannot {operation} a connection in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// `recv_sync` without a preceding `recv_nb`
    #[error("No read pending on connection")]
    NoPendingRead,

    #[error("Connection type {connection_type:?} does not support {operation}")]
    Unsupported {
        connection_type: ConnectionType,
        operation: &'static str,
    },

    /// Unparseable text form of a connection description
    #[error("Invalid connection description '{text}': {reason}")]
    InvalidDescription { text: String, reason: &'static str },
}

impl ConnectionError {
    pub(crate) fn read(size: usize, error: &io::Error) -> Self {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            return ConnectionError::Closed;
        }
        ConnectionError::Read {
            size,
            reason: error.to_string(),
        }
    }

    pub(crate) fn write(size: usize, error: &io::Error) -> Self {
        ConnectionError::Write {
            size,
            reason: error.to_string(),
        }
    }
}
