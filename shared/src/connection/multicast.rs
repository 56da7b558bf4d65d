use std::{
    io, mem,
    net::{Ipv4Addr, SocketAddrV4, UdpSocket},
    os::unix::io::{AsRawFd, FromRawFd, RawFd},
    sync::{Arc, Mutex},
};

use log::{debug, info, warn};

use crate::sync::lock;

use super::{
    error::ConnectionError, Connection, ConnectionBase, ConnectionDescription, ConnectionPtr,
    ConnectionState, ConnectionType, DEFAULT_PORT,
};

/// Group joined when the description names none
pub const DEFAULT_MULTICAST_GROUP: &str = "239.255.42.42";

/// Largest UDP payload over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Received bytes of the current datagram not yet handed out
struct Datagram {
    bytes: Vec<u8>,
    offset: usize,
}

impl Datagram {
    fn remaining(&self) -> &[u8] {
        &self.bytes[self.offset..]
    }
}

/// UDP multicast transport. Every member of a group binds the group port and
/// receives what any member sends, its own datagrams included. Delivery is
/// unreliable and unordered across senders; each `send` is one datagram, so
/// a packet is never split between senders.
///
/// Connections of this type have no listen or accept side: `connect` joins
/// the group and makes the connection both readable and writable.
pub struct MulticastConnection {
    base: ConnectionBase,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    group: Mutex<Option<SocketAddrV4>>,
    datagram: Mutex<Datagram>,
    pending_read: Mutex<Option<usize>>,
}

impl MulticastConnection {
    pub fn new(description: ConnectionDescription) -> Self {
        debug_assert_eq!(description.connection_type, ConnectionType::Multicast);
        Self {
            base: ConnectionBase::new(description, ConnectionState::Closed),
            socket: Mutex::new(None),
            group: Mutex::new(None),
            datagram: Mutex::new(Datagram {
                bytes: Vec::new(),
                offset: 0,
            }),
            pending_read: Mutex::new(None),
        }
    }

    fn socket(&self) -> Result<Arc<UdpSocket>, ConnectionError> {
        lock(&self.socket).clone().ok_or(ConnectionError::Closed)
    }

    fn join(description: &ConnectionDescription) -> Result<(UdpSocket, SocketAddrV4), String> {
        let parse = |text: &str| -> Result<Ipv4Addr, String> {
            text.parse()
                .map_err(|_| format!("'{}' is not an IPv4 address", text))
        };
        let group = parse(&description.hostname)?;
        if !group.is_multicast() {
            return Err(format!("{} is not a multicast group", group));
        }
        let interface = if description.interface.is_empty() {
            Ipv4Addr::UNSPECIFIED
        } else {
            parse(&description.interface)?
        };

        let socket = bind_reusable(description.port).map_err(|error| error.to_string())?;
        socket
            .join_multicast_v4(&group, &interface)
            .map_err(|error| error.to_string())?;
        if !interface.is_unspecified() {
            set_multicast_interface(&socket, interface).map_err(|error| error.to_string())?;
        }
        socket
            .set_multicast_loop_v4(true)
            .map_err(|error| error.to_string())?;
        Ok((socket, SocketAddrV4::new(group, description.port)))
    }

    /// Refills the datagram buffer with the next datagram from the group
    fn next_datagram(
        &self,
        datagram: &mut Datagram,
        wanted: usize,
    ) -> Result<(), ConnectionError> {
        let socket = self.socket()?;
        datagram.bytes.resize(MAX_DATAGRAM_SIZE, 0);
        datagram.offset = 0;
        match socket.recv_from(&mut datagram.bytes) {
            Ok((received, _)) => {
                datagram.bytes.truncate(received);
                Ok(())
            }
            Err(error) => {
                datagram.bytes.clear();
                if self.is_closed() {
                    return Err(ConnectionError::Closed);
                }
                Err(ConnectionError::read(wanted, &error))
            }
        }
    }
}

/// A UDP socket bound to `port` on every interface, with address reuse so
/// that several group members on one host can share the port
fn bind_reusable(port: u16) -> io::Result<UdpSocket> {
    // SAFETY: the descriptor is checked and handed to UdpSocket, which owns it
    let socket = unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_UDP);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        UdpSocket::from_raw_fd(fd)
    };
    let fd = socket.as_raw_fd();

    let on: libc::c_int = 1;
    // SAFETY: `on` outlives the call and its size is passed along
    let result = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &on as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: sockaddr_in is plain data, all zero is a valid value
    let mut address: libc::sockaddr_in = unsafe { mem::zeroed() };
    address.sin_family = libc::AF_INET as libc::sa_family_t;
    address.sin_port = port.to_be();
    address.sin_addr.s_addr = u32::from(Ipv4Addr::UNSPECIFIED).to_be();
    // SAFETY: `address` is a complete sockaddr_in of the given size
    let result = unsafe {
        libc::bind(
            fd,
            &address as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(socket)
}

/// Sends the group's datagrams out through `interface`
fn set_multicast_interface(socket: &UdpSocket, interface: Ipv4Addr) -> io::Result<()> {
    let address = libc::in_addr {
        s_addr: u32::from(interface).to_be(),
    };
    // SAFETY: `address` outlives the call and its size is passed along
    let result = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            &address as *const libc::in_addr as *const libc::c_void,
            mem::size_of::<libc::in_addr>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Connection for MulticastConnection {
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
        self.base.update_description(|description| {
            if description.hostname.is_empty() {
                description.hostname = DEFAULT_MULTICAST_GROUP.to_string();
            }
            if description.port == 0 {
                description.port = DEFAULT_PORT;
            }
        });
        let description = self.base.description();

        match Self::join(&description) {
            Ok((socket, group)) => {
                self.base.set_notifier(Some(socket.as_raw_fd()));
                *lock(&self.socket) = Some(Arc::new(socket));
                *lock(&self.group) = Some(group);
                self.base.set_state(ConnectionState::Connected);
                info!("Joined multicast group {}", description);
                Ok(())
            }
            Err(reason) => {
                self.base.set_state(ConnectionState::Closed);
                Err(ConnectionError::Connect {
                    description: description.to_string(),
                    reason,
                })
            }
        }
    }

    fn listen(&self) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported {
            connection_type: ConnectionType::Multicast,
            operation: "listen",
        })
    }

    fn accept_nb(&self) -> Result<(), ConnectionError> {
        Err(ConnectionError::Unsupported {
            connection_type: ConnectionType::Multicast,
            operation: "accept",
        })
    }

    fn accept_sync(&self) -> Option<ConnectionPtr> {
        None
    }

    fn send(&self, bytes: &[u8]) -> Result<usize, ConnectionError> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(ConnectionError::Write {
                size: bytes.len(),
                reason: format!("larger than a datagram of {} bytes", MAX_DATAGRAM_SIZE),
            });
        }
        let socket = self.socket()?;
        let group = (*lock(&self.group)).ok_or(ConnectionError::Closed)?;
        let sent = socket
            .send_to(bytes, group)
            .map_err(|error| ConnectionError::write(bytes.len(), &error))?;
        if sent != bytes.len() {
            return Err(ConnectionError::Write {
                size: bytes.len(),
                reason: format!("datagram cut to {} bytes", sent),
            });
        }
        Ok(sent)
    }

    fn recv_nb(&self, size: usize) {
        let previous = lock(&self.pending_read).replace(size);
        debug_assert!(previous.is_none(), "recv_nb called twice without recv_sync");
    }

    fn recv_sync(&self) -> Result<Vec<u8>, ConnectionError> {
        let size = lock(&self.pending_read)
            .take()
            .ok_or(ConnectionError::NoPendingRead)?;
        let mut buffer = vec![0u8; size];
        self.recv_into(&mut buffer)?;
        Ok(buffer)
    }

    /// Reads from the current datagram, fetching the next one once it is
    /// used up. A read longer than what is left of a datagram fails and
    /// drops the rest of it, so a short datagram never bleeds into the next.
    fn recv_into(&self, buffer: &mut [u8]) -> Result<(), ConnectionError> {
        let mut datagram = lock(&self.datagram);
        while datagram.remaining().is_empty() {
            self.next_datagram(&mut datagram, buffer.len())?;
        }
        let available = datagram.remaining().len();
        if available < buffer.len() {
            datagram.offset = datagram.bytes.len();
            warn!(
                "Dropping datagram on {}: {} bytes left, {} wanted",
                self.description(),
                available,
                buffer.len()
            );
            return Err(ConnectionError::Read {
                size: buffer.len(),
                reason: format!("datagram holds only {} more bytes", available),
            });
        }
        let offset = datagram.offset;
        buffer.copy_from_slice(&datagram.bytes[offset..offset + buffer.len()]);
        datagram.offset += buffer.len();
        Ok(())
    }

    fn close(&self) {
        if !self.base.mark_closed() {
            return;
        }
        let socket = lock(&self.socket).take();
        if let (Some(socket), Some(group)) = (socket, lock(&self.group).take()) {
            if let Err(error) = socket.leave_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED) {
                debug!("Leaving {} failed: {}", group, error);
            }
        }
        lock(&self.pending_read).take();
        debug!("Closed {}", self.description());
    }

    fn notifier(&self) -> Option<RawFd> {
        self.base.notifier()
    }
}

impl Drop for MulticastConnection {
    fn drop(&mut self) {
        self.close();
    }
}
