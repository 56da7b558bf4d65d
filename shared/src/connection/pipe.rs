use std::{
    os::unix::{io::RawFd, net::UnixStream},
    sync::{Arc, Mutex},
};

use log::debug;

use crate::sync::lock;

use super::{
    error::ConnectionError,
    stream::StreamChannel,
    Connection, ConnectionBase, ConnectionDescription, ConnectionPtr, ConnectionState,
    ConnectionType,
};

/// Anonymous in-process pipe. `connect` creates both ends at once; the far
/// end is handed out once through `accept_nb` / `accept_sync`.
pub struct PipeConnection {
    base: ConnectionBase,
    channel: StreamChannel<UnixStream>,
    sibling: Mutex<Option<ConnectionPtr>>,
}

impl PipeConnection {
    pub fn new() -> Self {
        Self {
            base: ConnectionBase::new(ConnectionDescription::pipe(), ConnectionState::Closed),
            channel: StreamChannel::new(),
            sibling: Mutex::new(None),
        }
    }

    fn attach(&self, stream: UnixStream) -> Result<(), ConnectionError> {
        let fd = self
            .channel
            .attach(stream)
            .map_err(|error| ConnectionError::Connect {
                description: ConnectionDescription::pipe().to_string(),
                reason: error.to_string(),
            })?;
        self.base.set_notifier(Some(fd));
        self.base.set_state(ConnectionState::Connected);
        Ok(())
    }
}

impl Default for PipeConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// Two connected pipe endpoints
pub fn pipe_pair() -> Result<(ConnectionPtr, ConnectionPtr), ConnectionError> {
    let near = PipeConnection::new();
    near.connect()?;
    near.accept_nb()?;
    let far = near.accept_sync().ok_or(ConnectionError::Closed)?;
    Ok((Arc::new(near), far))
}

impl Connection for PipeConnection {
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
        let connect_error = |error: std::io::Error| ConnectionError::Connect {
            description: ConnectionDescription::pipe().to_string(),
            reason: error.to_string(),
        };

        let result = UnixStream::pair().map_err(connect_error).and_then(|(near, far)| {
            let sibling = PipeConnection::new();
            sibling.attach(far)?;
            self.attach(near)?;
            *lock(&self.sibling) = Some(Arc::new(sibling));
            Ok(())
        });
        if result.is_err() {
            self.base.set_state(ConnectionState::Closed);
        }
        result
    }

    fn listen(&self) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported {
            connection_type: ConnectionType::Pipe,
            operation: "listen",
        })
    }

    fn accept_nb(&self) -> Result<(), ConnectionError> {
        self.base.expect_state("accept", ConnectionState::Connected)?;
        if lock(&self.sibling).is_none() {
            return Err(ConnectionError::Unsupported {
                connection_type: ConnectionType::Pipe,
                operation: "accept after the far end was taken",
            });
        }
        Ok(())
    }

    fn accept_sync(&self) -> Option<ConnectionPtr> {
        lock(&self.sibling).take()
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
        self.channel.close();
        lock(&self.sibling).take();
        debug!("Closed pipe");
    }

    fn notifier(&self) -> Option<RawFd> {
        self.base.notifier()
    }
}

impl Drop for PipeConnection {
    fn drop(&mut self) {
        self.close();
    }
}
