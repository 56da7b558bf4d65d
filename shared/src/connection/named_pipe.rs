use std::{
    fs,
    os::unix::{
        io::{AsRawFd, RawFd},
        net::{UnixListener, UnixStream},
    },
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use log::{debug, info, warn};

use crate::sync::lock;

use super::{
    error::ConnectionError,
    stream::StreamChannel,
    Connection, ConnectionBase, ConnectionDescription, ConnectionPtr, ConnectionState,
    ConnectionType,
};

/// Local stream socket bound to a filesystem path
pub struct NamedPipeConnection {
    base: ConnectionBase,
    channel: StreamChannel<UnixStream>,
    listener: Mutex<Option<UnixListener>>,
    accept_pending: AtomicBool,
}

impl NamedPipeConnection {
    pub fn new(description: ConnectionDescription) -> Self {
        debug_assert_eq!(description.connection_type, ConnectionType::NamedPipe);
        Self {
            base: ConnectionBase::new(description, ConnectionState::Closed),
            channel: StreamChannel::new(),
            listener: Mutex::new(None),
            accept_pending: AtomicBool::new(false),
        }
    }
}

impl Connection for NamedPipeConnection {
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

        let result = UnixStream::connect(&description.filename)
            .and_then(|stream| self.channel.attach(stream))
            .map_err(|error| ConnectionError::Connect {
                description: description.to_string(),
                reason: error.to_string(),
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

        let listener =
            UnixListener::bind(&description.filename).map_err(|error| ConnectionError::Listen {
                description: description.to_string(),
                reason: error.to_string(),
            })?;

        self.base.set_notifier(Some(listener.as_raw_fd()));
        *lock(&self.listener) = Some(listener);
        self.base.set_state(ConnectionState::Listening);
        info!("Listening on {}", description);
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
        let listener = lock(&self.listener).as_ref()?.try_clone().ok()?;

        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(error) => {
                warn!("Accept on {} failed: {}", self.base.description(), error);
                return None;
            }
        };

        let connection = NamedPipeConnection::new(self.base.description());
        match connection.channel.attach(stream) {
            Ok(fd) => {
                connection.base.set_notifier(Some(fd));
                connection.base.set_state(ConnectionState::Connected);
                Some(Arc::new(connection))
            }
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
        if lock(&self.listener).take().is_some() {
            let path = self.base.description().filename;
            if let Err(error) = fs::remove_file(&path) {
                debug!("Could not remove {}: {}", path, error);
            }
        }
        self.channel.close();
        info!("Closed {}", self.base.description());
    }

    fn notifier(&self) -> Option<RawFd> {
        self.base.notifier()
    }
}

impl Drop for NamedPipeConnection {
    fn drop(&mut self) {
        self.close();
    }
}
