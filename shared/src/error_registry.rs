use std::{collections::HashMap, sync::RwLock};

use crate::sync::{read, write};

/// Numeric error code, resolvable to text through an `ErrorRegistry`
pub type ErrorCode = u32;

pub const ERROR_NONE: ErrorCode = 0;
/// First code available to applications
pub const ERROR_CUSTOM: ErrorCode = 0x1000;

// connection errors
pub const ERROR_CONNECTION_CONNECT: ErrorCode = 0x0100;
pub const ERROR_CONNECTION_LISTEN: ErrorCode = 0x0101;
pub const ERROR_CONNECTION_ACCEPT: ErrorCode = 0x0102;
pub const ERROR_CONNECTION_WRITE: ErrorCode = 0x0103;
pub const ERROR_CONNECTION_READ: ErrorCode = 0x0104;
pub const ERROR_CONNECTION_CLOSED: ErrorCode = 0x0105;
pub const ERROR_CONNECTION_STATE: ErrorCode = 0x0106;
pub const ERROR_CONNECTION_NO_READ: ErrorCode = 0x0107;
pub const ERROR_CONNECTION_UNSUPPORTED: ErrorCode = 0x0108;
pub const ERROR_CONNECTION_DESCRIPTION: ErrorCode = 0x0109;

// dispatch errors
pub const ERROR_DISPATCH_UNKNOWN_COMMAND: ErrorCode = 0x0200;
pub const ERROR_DISPATCH_UNKNOWN_OBJECT: ErrorCode = 0x0201;
pub const ERROR_DISPATCH_QUEUE_CLOSED: ErrorCode = 0x0202;
pub const ERROR_DISPATCH_PACKET: ErrorCode = 0x0203;
pub const ERROR_DISPATCH_PAYLOAD: ErrorCode = 0x0204;
pub const ERROR_DISPATCH_CONNECTION: ErrorCode = 0x0205;
pub const ERROR_DISPATCH_REJECTED: ErrorCode = 0x0206;

/// Implemented by every runtime error type
pub trait ErrorCoded {
    fn code(&self) -> ErrorCode;
}

const DEFAULT_STRINGS: &[(ErrorCode, &str)] = &[
    (ERROR_NONE, "No error"),
    (ERROR_CONNECTION_CONNECT, "Could not connect to remote endpoint"),
    (ERROR_CONNECTION_LISTEN, "Could not listen on local endpoint"),
    (ERROR_CONNECTION_ACCEPT, "Could not accept incoming connection"),
    (ERROR_CONNECTION_WRITE, "Write to connection failed"),
    (ERROR_CONNECTION_READ, "Read from connection failed"),
    (ERROR_CONNECTION_CLOSED, "Connection closed by remote end"),
    (ERROR_CONNECTION_STATE, "Operation invalid in connection state"),
    (ERROR_CONNECTION_NO_READ, "No read pending on connection"),
    (ERROR_CONNECTION_UNSUPPORTED, "Operation not supported by connection type"),
    (ERROR_CONNECTION_DESCRIPTION, "Invalid connection description"),
    (ERROR_DISPATCH_UNKNOWN_COMMAND, "Unknown command"),
    (ERROR_DISPATCH_UNKNOWN_OBJECT, "Command for unknown object"),
    (ERROR_DISPATCH_QUEUE_CLOSED, "Command queue closed"),
    (ERROR_DISPATCH_PACKET, "Malformed packet"),
    (ERROR_DISPATCH_PAYLOAD, "Malformed command payload"),
    (ERROR_DISPATCH_CONNECTION, "Connection failed while handling command"),
    (ERROR_DISPATCH_REJECTED, "Command rejected by handler"),
];

/// Maps error codes to human readable text. Starts with the codes of this
/// crate; other layers and applications add their own.
pub struct ErrorRegistry {
    strings: RwLock<HashMap<ErrorCode, String>>,
}

impl ErrorRegistry {
    /// A registry without any entries
    pub fn empty() -> Self {
        Self {
            strings: RwLock::new(HashMap::new()),
        }
    }

    pub fn new() -> Self {
        let registry = Self::empty();
        registry.set_strings(DEFAULT_STRINGS);
        registry
    }

    pub fn set_string(&self, code: ErrorCode, text: impl Into<String>) {
        write(&self.strings).insert(code, text.into());
    }

    pub fn set_strings(&self, strings: &[(ErrorCode, &str)]) {
        let mut map = write(&self.strings);
        for (code, text) in strings {
            map.insert(*code, (*text).to_string());
        }
    }

    pub fn erase_string(&self, code: ErrorCode) -> bool {
        write(&self.strings).remove(&code).is_some()
    }

    pub fn get_string(&self, code: ErrorCode) -> Option<String> {
        read(&self.strings).get(&code).cloned()
    }

    /// Text for `code`, or a placeholder naming the code
    pub fn describe(&self, code: ErrorCode) -> String {
        self.get_string(code)
            .unwrap_or_else(|| format!("Unknown error 0x{:x}", code))
    }

    pub fn len(&self) -> usize {
        read(&self.strings).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

mod impls {
    use super::*;
    use crate::{connection::ConnectionError, dispatcher::DispatchError};

    impl ErrorCoded for ConnectionError {
        fn code(&self) -> ErrorCode {
            match self {
                ConnectionError::Connect { .. } => ERROR_CONNECTION_CONNECT,
                ConnectionError::Listen { .. } => ERROR_CONNECTION_LISTEN,
                ConnectionError::Accept { .. } => ERROR_CONNECTION_ACCEPT,
                ConnectionError::Write { .. } => ERROR_CONNECTION_WRITE,
                ConnectionError::Read { .. } => ERROR_CONNECTION_READ,
                ConnectionError::Closed => ERROR_CONNECTION_CLOSED,
                ConnectionError::InvalidState { .. } => ERROR_CONNECTION_STATE,
                ConnectionError::NoPendingRead => ERROR_CONNECTION_NO_READ,
                ConnectionError::Unsupported { .. } => ERROR_CONNECTION_UNSUPPORTED,
                ConnectionError::InvalidDescription { .. } => ERROR_CONNECTION_DESCRIPTION,
            }
        }
    }

    impl ErrorCoded for DispatchError {
        fn code(&self) -> ErrorCode {
            match self {
                DispatchError::UnknownCommand { .. } => ERROR_DISPATCH_UNKNOWN_COMMAND,
                DispatchError::UnknownObject { .. } => ERROR_DISPATCH_UNKNOWN_OBJECT,
                DispatchError::QueueClosed { .. } => ERROR_DISPATCH_QUEUE_CLOSED,
                DispatchError::Packet(_) => ERROR_DISPATCH_PACKET,
                DispatchError::Serde(_) => ERROR_DISPATCH_PAYLOAD,
                DispatchError::Connection(_) => ERROR_DISPATCH_CONNECTION,
                DispatchError::Rejected { .. } => ERROR_DISPATCH_REJECTED,
            }
        }
    }
}
