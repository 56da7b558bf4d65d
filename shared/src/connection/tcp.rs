use std::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    os::unix::io::{AsRawFd, RawFd},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use log::{info, warn};

use crate::sync::lock;

use super::{
    error::ConnectionError,
    stream::StreamChannel,
    Connection, ConnectionBase, ConnectionDescription, ConnectionPtr, ConnectionState,
    ConnectionType,
};

/// TCP/IP transport. Nagle is disabled since every packet is a complete
/// command somebody waits for.
pub struct TcpConnection {
    base: ConnectionBase,
    channel: StreamChannel<TcpStream>,
    listener: Mutex<Option<TcpListener>>,
    accept_pending: AtomicBool,
}

impl TcpConnection {
    pub fn new(description: ConnectionDescription) -> Self {
        debug_assert_eq!(description.connection_type, ConnectionType::TcpIp);
        Self {
            base: ConnectionBase::new(description, ConnectionState::Closed),
            channel: StreamChannel::new(),
            listener: Mutex::new(None),
            accept_pending: AtomicBool::new(false),
        }
    }

    fn from_stream(stream: TcpStream) -> Result<Self, ConnectionError> {
        let mut description = ConnectionDescription::new(ConnectionType::TcpIp);
        if let Ok(peer) = stream.peer_addr() {
            description.hostname = peer.ip().to_string();
            description.port = peer.port();
        }
        let accept_error = |reason: String| ConnectionError::Accept {
            description: description.to_string(),
            reason,
        };

        stream
            .set_nodelay(true)
            .map_err(|error| accept_error(error.to_string()))?;
        let connection = Self::new(description.clone());
        let fd = connection
            .channel
            .attach(stream)
            .map_err(|error| accept_error(error.to_string()))?;
        connection.base.set_notifier(Some(fd));
        connection.base.set_state(ConnectionState::Connected);
        Ok(connection)
    }

    fn bind_address(description: &ConnectionDescription) -> String {
        let host = if description.hostname.is_empty() {
            "0.0.0.0"
        } else {
            description.hostname.as_str()
        };
        format!("{}:{}", host, description.port)
    }

    fn connect_address(description: &ConnectionDescription) -> String {
        let host = if description.hostname.is_empty() {
            "127.0.0.1"
        } else {
            description.hostname.as_str()
        };
        format!("{}:{}", host, description.port)
    }
}

impl Connection for TcpConnection {
    fn description(&self) -> ConnectionDescription {
        self.base.description()
    }

    fn state(&self) -> ConnectionState {
        self.base.state()
    }

    fn connect(&self) -> Result<(), ConnectionError> {
        self.base.transition(
            "connect",
            ConnectionState::Closed,
            ConnectionState::Connecting,
        )?;
        let description = self.base.description();
        let connect_error = |reason: String| ConnectionError::Connect {
            description: description.to_string(),
            reason,
        };

        let result = Self::connect_address(&description)
            .to_socket_addrs()
            .map_err(|error| connect_error(error.to_string()))
            .and_then(|addresses| {
                let addresses: Vec<_> = addresses.collect();
                TcpStream::connect(&addresses[..]).map_err(|error| connect_error(error.to_string()))
            })
            .and_then(|stream| {
                stream
                    .set_nodelay(true)
                    .map_err(|error| connect_error(error.to_string()))?;
                self.channel
                    .attach(stream)
                    .map_err(|error| connect_error(error.to_string()))
            });

        match result {
            Ok(fd) => {
                self.base.set_notifier(Some(fd));
                self.base.set_state(ConnectionState::Connected);
                info!("Connected to {}", description);
                Ok(())
            }
            Err(error) => {
                self.base.set_state(ConnectionState::Closed);
                Err(error)
            }
        }
    }

    fn listen(&self) -> Result<(), ConnectionError> {
        self.base.expect_state("listen", ConnectionState::Closed)?;
        let description = self.base.description();

        let listener = TcpListener::bind(Self::bind_address(&description)).map_err(|error| {
            ConnectionError::Listen {
                description: description.to_string(),
                reason: error.to_string(),
            }
        })?;
        if let Ok(address) = listener.local_addr() {
            self.base
                .update_description(|description| description.port = address.port());
        }

        self.base.set_notifier(Some(listener.as_raw_fd()));
        *lock(&self.listener) = Some(listener);
        self.base.set_state(ConnectionState::Listening);
        info!("Listening on {}", self.base.description());
        Ok(())
    }

    fn accept_nb(&self) -> Result<(), ConnectionError> {
        self.base.expect_state("accept", ConnectionState::Listening)?;
        self.accept_pending.store(true, Ordering::Release);
        Ok(())
    }

    fn accept_sync(&self) -> Option<ConnectionPtr> {
        if !self.accept_pending.swap(false, Ordering::AcqRel) {
            warn!("accept_sync without accept_nb on {}", self.base.description());
            return None;
        }
        // accept on a duplicate so that close() never waits for the accept
        let listener = lock(&self.listener).as_ref()?.try_clone().ok()?;

        match listener.accept() {
            Ok((stream, _)) => match Self::from_stream(stream) {
                Ok(connection) => {
                    info!("Accepted {}", connection.base.description());
                    Some(Arc::new(connection))
                }
                Err(error) => {
                    warn!("{}", error);
                    None
                }
            },
            Err(error) => {
                warn!("Accept on {} failed: {}", self.base.description(), error);
                None
            }
        }
    }

    fn send(&self, bytes: &[u8]) -> Result<usize, ConnectionError> {
        self.channel.send(bytes)
    }

    fn recv_nb(&self, size: usize) {
        self.channel.recv_nb(size);
    }

    fn recv_sync(&self) -> Result<Vec<u8>, ConnectionError> {
        self.channel.recv_sync()
    }

    fn recv_into(&self, buffer: &mut [u8]) -> Result<(), ConnectionError> {
        self.channel.recv_into(buffer)
    }

    fn close(&self) {
        if !self.base.mark_closed() {
            return;
        }
        lock(&self.listener).take();
        self.channel.close();
        info!("Closed {}", self.base.description());
    }

    fn notifier(&self) -> Option<RawFd> {
        self.base.notifier()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}
