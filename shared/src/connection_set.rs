use std::{
    collections::VecDeque,
    io::{Read, Write},
    os::unix::{io::AsRawFd, net::UnixStream},
    sync::Mutex,
    time::Duration,
};

use log::{trace, warn};

use crate::{
    connection::{same_connection, ConnectionPtr},
    sync::lock,
};

/// Outcome of one `ConnectionSet::select`
#[derive(Clone)]
pub enum ConnectionSetEvent {
    /// A listener has a peer waiting to be accepted
    Connect(ConnectionPtr),
    /// Data can be read from the connection
    Data(ConnectionPtr),
    /// The remote end hung up
    Disconnect(ConnectionPtr),
    /// The connection no longer has a valid OS handle
    InvalidHandle(ConnectionPtr),
    /// `interrupt` was called, or the set of connections changed
    Interrupt,
    Timeout,
    /// The OS reported an error condition on the connection
    Error(ConnectionPtr),
    /// The wait itself failed
    SelectError,
}

impl std::fmt::Debug for ConnectionSetEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (name, connection) = match self {
            ConnectionSetEvent::Connect(connection) => ("Connect", Some(connection)),
            ConnectionSetEvent::Data(connection) => ("Data", Some(connection)),
            ConnectionSetEvent::Disconnect(connection) => ("Disconnect", Some(connection)),
            ConnectionSetEvent::InvalidHandle(connection) => ("InvalidHandle", Some(connection)),
            ConnectionSetEvent::Interrupt => ("Interrupt", None),
            ConnectionSetEvent::Timeout => ("Timeout", None),
            ConnectionSetEvent::Error(connection) => ("Error", Some(connection)),
            ConnectionSetEvent::SelectError => ("SelectError", None),
        };
        match connection {
            Some(connection) => write!(f, "{}({})", name, connection.description()),
            None => write!(f, "{}", name),
        }
    }
}

impl ConnectionSetEvent {
    pub fn connection(&self) -> Option<&ConnectionPtr> {
        match self {
            ConnectionSetEvent::Connect(connection)
            | ConnectionSetEvent::Data(connection)
            | ConnectionSetEvent::Disconnect(connection)
            | ConnectionSetEvent::InvalidHandle(connection)
            | ConnectionSetEvent::Error(connection) => Some(connection),
            ConnectionSetEvent::Interrupt
            | ConnectionSetEvent::Timeout
            | ConnectionSetEvent::SelectError => None,
        }
    }
}

struct SetState {
    connections: Vec<ConnectionPtr>,
    // events found by the last poll and not yet handed out
    ready: VecDeque<ConnectionSetEvent>,
    // first connection examined by the next poll
    cursor: usize,
}

/// Waits for events on a changing set of connections.
///
/// `select` is meant to be driven by a single thread; connections may be
/// added and removed from any thread, which wakes the selecting thread.
pub struct ConnectionSet {
    state: Mutex<SetState>,
    wake_reader: Mutex<UnixStream>,
    wake_writer: UnixStream,
}

impl ConnectionSet {
    pub fn new() -> std::io::Result<Self> {
        let (wake_reader, wake_writer) = UnixStream::pair()?;
        wake_reader.set_nonblocking(true)?;
        wake_writer.set_nonblocking(true)?;

        Ok(Self {
            state: Mutex::new(SetState {
                connections: Vec::new(),
                ready: VecDeque::new(),
                cursor: 0,
            }),
            wake_reader: Mutex::new(wake_reader),
            wake_writer,
        })
    }

    pub fn add_connection(&self, connection: ConnectionPtr) {
        lock(&self.state).connections.push(connection);
        self.interrupt();
    }

    /// Removes the connection and any event already reported for it
    pub fn remove_connection(&self, connection: &ConnectionPtr) -> bool {
        let removed = {
            let mut state = lock(&self.state);
            let before = state.connections.len();
            state
                .connections
                .retain(|other| !same_connection(other, connection));
            state.ready.retain(|event| {
                event
                    .connection()
                    .map_or(true, |other| !same_connection(other, connection))
            });
            before != state.connections.len()
        };
        if removed {
            self.interrupt();
        }
        removed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connections(&self) -> Vec<ConnectionPtr> {
        lock(&self.state).connections.clone()
    }

    /// Wakes up a thread blocked in `select`
    pub fn interrupt(&self) {
        // a full wake pipe already guarantees a wake-up
        let _ = (&self.wake_writer).write(&[1]);
    }

    /// Blocks until an event happens or `timeout` passes. `None` waits
    /// forever. When several connections are ready at once they are
    /// reported round-robin over successive calls.
    pub fn select(&self, timeout: Option<Duration>) -> ConnectionSetEvent {
        let connections = {
            let mut state = lock(&self.state);
            if let Some(event) = state.ready.pop_front() {
                return event;
            }
            state.connections.clone()
        };

        let mut fds = Vec::with_capacity(connections.len() + 1);
        fds.push(libc::pollfd {
            fd: lock(&self.wake_reader).as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        let mut invalid = Vec::new();
        let mut polled = Vec::with_capacity(connections.len());
        for connection in connections {
            match connection.notifier() {
                Some(fd) => {
                    fds.push(libc::pollfd {
                        fd,
                        events: libc::POLLIN,
                        revents: 0,
                    });
                    polled.push(connection);
                }
                None => invalid.push(connection),
            }
        }
        if let Some(connection) = invalid.into_iter().next() {
            return ConnectionSetEvent::InvalidHandle(connection);
        }

        let timeout_ms = match timeout {
            None => -1,
            Some(timeout) => timeout.as_millis().min(i32::MAX as u128) as libc::c_int,
        };

        // SAFETY: `fds` is a live, exclusively borrowed array of `fds.len()`
        // pollfd structs for the whole call
        let result =
            unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

        if result < 0 {
            let error = std::io::Error::last_os_error();
            if error.kind() == std::io::ErrorKind::Interrupted {
                return ConnectionSetEvent::Interrupt;
            }
            warn!("poll failed: {}", error);
            return ConnectionSetEvent::SelectError;
        }
        if result == 0 {
            return ConnectionSetEvent::Timeout;
        }

        let interrupted = fds[0].revents != 0;
        if interrupted {
            self.drain_wake_pipe();
        }

        let mut state = lock(&self.state);
        let count = polled.len();
        let start = if count == 0 { 0 } else { state.cursor % count };
        state.cursor = start + 1;
        for offset in 0..count {
            let index = (start + offset) % count;
            let revents = fds[index + 1].revents;
            let connection = &polled[index];
            if revents == 0 {
                continue;
            }
            // skip connections removed while we were polling
            if !state
                .connections
                .iter()
                .any(|other| same_connection(other, connection))
            {
                continue;
            }
            let event = Self::classify(connection.clone(), revents);
            trace!("select: {:?}", event);
            state.ready.push_back(event);
        }

        if interrupted {
            return ConnectionSetEvent::Interrupt;
        }
        state
            .ready
            .pop_front()
            .unwrap_or(ConnectionSetEvent::Interrupt)
    }

    fn classify(connection: ConnectionPtr, revents: libc::c_short) -> ConnectionSetEvent {
        if revents & libc::POLLNVAL != 0 {
            return ConnectionSetEvent::InvalidHandle(connection);
        }
        if revents & libc::POLLERR != 0 {
            return ConnectionSetEvent::Error(connection);
        }
        if revents & libc::POLLIN != 0 {
            if connection.is_listening() {
                return ConnectionSetEvent::Connect(connection);
            }
            // EOF is readable too; the read reports the disconnect
            return ConnectionSetEvent::Data(connection);
        }
        ConnectionSetEvent::Disconnect(connection)
    }

    fn drain_wake_pipe(&self) {
        let mut reader = lock(&self.wake_reader);
        let mut buffer = [0u8; 64];
        while let Ok(read) = reader.read(&mut buffer) {
            if read < buffer.len() {
                break;
            }
        }
    }
}
