use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    os::unix::{io::AsRawFd, net::UnixStream},
    sync::Mutex,
};

use log::trace;

use crate::sync::lock;

use super::error::ConnectionError;

/// Byte stream socket usable by `StreamChannel`
pub(crate) trait Stream: Read + Write + AsRawFd + Send + Sized {
    fn duplicate(&self) -> io::Result<Self>;

    fn shutdown_both(&self) -> io::Result<()>;
}

impl Stream for TcpStream {
    fn duplicate(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl Stream for UnixStream {
    fn duplicate(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Read and write halves of a connected stream. The two halves are separate
/// handles to the same socket so a blocked reader never holds up a sender.
pub(crate) struct StreamChannel<S: Stream> {
    reader: Mutex<Option<S>>,
    // doubles as the send lock
    writer: Mutex<Option<S>>,
    pending_read: Mutex<Option<usize>>,
}

impl<S: Stream> StreamChannel<S> {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            pending_read: Mutex::new(None),
        }
    }

    /// Takes ownership of a connected stream, returning its notifier handle
    pub fn attach(&self, stream: S) -> io::Result<i32> {
        let writer = stream.duplicate()?;
        let fd = stream.as_raw_fd();
        *lock(&self.reader) = Some(stream);
        *lock(&self.writer) = Some(writer);
        Ok(fd)
    }

    pub fn send(&self, bytes: &[u8]) -> Result<usize, ConnectionError> {
        let mut writer = lock(&self.writer);
        let Some(stream) = writer.as_mut() else {
            return Err(ConnectionError::Closed);
        };
        stream
            .write_all(bytes)
            .and_then(|_| stream.flush())
            .map_err(|error| ConnectionError::write(bytes.len(), &error))?;
        trace!("sent {} bytes", bytes.len());
        Ok(bytes.len())
    }

    pub fn recv_into(&self, buffer: &mut [u8]) -> Result<(), ConnectionError> {
        let mut reader = lock(&self.reader);
        let Some(stream) = reader.as_mut() else {
            return Err(ConnectionError::Closed);
        };
        stream
            .read_exact(buffer)
            .map_err(|error| ConnectionError::read(buffer.len(), &error))
    }

    pub fn recv_nb(&self, size: usize) {
        let previous = lock(&self.pending_read).replace(size);
        debug_assert!(previous.is_none(), "recv_nb called twice without recv_sync");
    }

    pub fn recv_sync(&self) -> Result<Vec<u8>, ConnectionError> {
        let size = lock(&self.pending_read)
            .take()
            .ok_or(ConnectionError::NoPendingRead)?;
        let mut buffer = vec![0u8; size];
        self.recv_into(&mut buffer)?;
        Ok(buffer)
    }

    /// Shuts the socket down, which also wakes a reader blocked in `recv_into`
    pub fn close(&self) {
        if let Some(writer) = lock(&self.writer).take() {
            // the peer may already be gone, nothing left to report to
            let _ = writer.shutdown_both();
        }
        // a reader blocked on the socket sees EOF and drops its handle later
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        lock(&self.pending_read).take();
    }
}
