mod description;
mod error;
mod multicast;
mod named_pipe;
mod pipe;
mod stream;
mod tcp;

pub use description::{ConnectionDescription, DEFAULT_PORT};
pub use error::ConnectionError;
pub use multicast::{MulticastConnection, DEFAULT_MULTICAST_GROUP, MAX_DATAGRAM_SIZE};
pub use named_pipe::NamedPipeConnection;
pub use pipe::{pipe_pair, PipeConnection};
pub use tcp::TcpConnection;

use std::{
    os::unix::io::RawFd,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc, RwLock,
    },
};

use coterie_serde::{ByteReader, ByteWrite, ConstByteLength, Serde, SerdeErr};

use crate::sync::{read, write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    TcpIp,
    /// Anonymous in-process pair
    Pipe,
    /// Local socket at a filesystem path
    NamedPipe,
    /// Unreliable UDP multicast group, one datagram per packet
    Multicast,
}

impl Serde for ConnectionType {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        let value: u32 = match self {
            ConnectionType::TcpIp => 0,
            ConnectionType::Pipe => 1,
            ConnectionType::NamedPipe => 2,
            ConnectionType::Multicast => 3,
        };
        value.ser(writer);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        match u32::de(reader)? {
            0 => Ok(ConnectionType::TcpIp),
            1 => Ok(ConnectionType::Pipe),
            2 => Ok(ConnectionType::NamedPipe),
            3 => Ok(ConnectionType::Multicast),
            _ => Err(SerdeErr::InvalidValue {
                type_name: "ConnectionType",
            }),
        }
    }

    fn byte_length(&self) -> usize {
        Self::const_byte_length()
    }
}

impl ConnectionType {
    /// Whether connections of this type reach a group rather than one peer
    pub fn is_multicast(self) -> bool {
        self == ConnectionType::Multicast
    }
}

impl ConstByteLength for ConnectionType {
    fn const_byte_length() -> usize {
        4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Connected,
    Listening,
}

pub type ConnectionPtr = Arc<dyn Connection>;

/// A bidirectional byte stream between two processes, or a listener
/// producing such streams.
///
/// Connections are shared between the receiver thread, which reads, and any
/// number of senders, so every operation takes `&self`. Sends are serialized
/// by an internal lock so that packets from different threads never
/// interleave.
pub trait Connection: Send + Sync {
    fn description(&self) -> ConnectionDescription;

    fn state(&self) -> ConnectionState;

    /// Connects to the endpoint named by the description
    fn connect(&self) -> Result<(), ConnectionError>;

    /// Starts listening on the endpoint named by the description
    fn listen(&self) -> Result<(), ConnectionError>;

    /// Initiates an accept on a listening connection
    fn accept_nb(&self) -> Result<(), ConnectionError>;

    /// Completes an accept started by `accept_nb`, blocking until a peer
    /// connects. `None` if the listener was closed or the accept failed.
    fn accept_sync(&self) -> Option<ConnectionPtr>;

    /// Writes all of `bytes`, blocking until done
    fn send(&self, bytes: &[u8]) -> Result<usize, ConnectionError>;

    /// Posts a read of exactly `size` bytes, completed by `recv_sync`
    fn recv_nb(&self, size: usize);

    /// Completes the read posted by `recv_nb`
    fn recv_sync(&self) -> Result<Vec<u8>, ConnectionError>;

    /// Fills all of `buffer`, blocking until done
    fn recv_into(&self, buffer: &mut [u8]) -> Result<(), ConnectionError>;

    /// Releases the OS handle. Calling it again does nothing.
    fn close(&self);

    /// OS handle signalling readability, `None` once closed
    fn notifier(&self) -> Option<RawFd>;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn is_listening(&self) -> bool {
        self.state() == ConnectionState::Listening
    }

    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }
}

/// Builds an unconnected connection of the described type
pub fn create(description: &ConnectionDescription) -> ConnectionPtr {
    match description.connection_type {
        ConnectionType::TcpIp => Arc::new(TcpConnection::new(description.clone())),
        ConnectionType::Pipe => Arc::new(PipeConnection::new()),
        ConnectionType::NamedPipe => Arc::new(NamedPipeConnection::new(description.clone())),
        ConnectionType::Multicast => Arc::new(MulticastConnection::new(description.clone())),
    }
}

/// Whether both pointers refer to the same connection object
pub fn same_connection(a: &ConnectionPtr, b: &ConnectionPtr) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// State and description common to every transport
pub(crate) struct ConnectionBase {
    description: RwLock<ConnectionDescription>,
    state: RwLock<ConnectionState>,
    notifier: AtomicI32,
}

impl ConnectionBase {
    pub fn new(description: ConnectionDescription, state: ConnectionState) -> Self {
        Self {
            description: RwLock::new(description),
            state: RwLock::new(state),
            notifier: AtomicI32::new(-1),
        }
    }

    pub fn description(&self) -> ConnectionDescription {
        read(&self.description).clone()
    }

    pub fn update_description(&self, f: impl FnOnce(&mut ConnectionDescription)) {
        f(&mut write(&self.description));
    }

    pub fn state(&self) -> ConnectionState {
        *read(&self.state)
    }

    pub fn set_state(&self, state: ConnectionState) {
        *write(&self.state) = state;
    }

    /// Moves from `from` to `to` atomically, failing if the state was not `from`
    pub fn transition(
        &self,
        operation: &'static str,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionError> {
        let mut state = write(&self.state);
        if *state != from {
            return Err(ConnectionError::InvalidState {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    pub fn expect_state(
        &self,
        operation: &'static str,
        expected: ConnectionState,
    ) -> Result<(), ConnectionError> {
        let state = self.state();
        if state != expected {
            return Err(ConnectionError::InvalidState { operation, state });
        }
        Ok(())
    }

    pub fn notifier(&self) -> Option<RawFd> {
        let fd = self.notifier.load(Ordering::Acquire);
        (fd >= 0).then_some(fd)
    }

    pub fn set_notifier(&self, fd: Option<RawFd>) {
        self.notifier.store(fd.unwrap_or(-1), Ordering::Release);
    }

    /// Marks the connection closed; false if it already was
    pub fn mark_closed(&self) -> bool {
        let mut state = write(&self.state);
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = ConnectionState::Closed;
        self.notifier.store(-1, Ordering::Release);
        true
    }
}
