use std::{fmt, path::PathBuf, str::FromStr};

use coterie_serde::{ByteReader, ByteWrite, Serde, SerdeErr};

use super::{error::ConnectionError, ConnectionType};

pub const DEFAULT_PORT: u16 = 4242;

/// Everything needed to create a connection of a given type, both for
/// listening and for connecting. Descriptions travel inside the connect
/// handshake so that peers know how to reach each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescription {
    pub connection_type: ConnectionType,
    /// Host to bind or connect to; empty binds every interface. The group
    /// address for multicast.
    pub hostname: String,
    /// Local IPv4 address multicast traffic goes through; empty lets the
    /// routing table pick
    pub interface: String,
    /// Port for TCP/IP and multicast; 0 lets the OS pick one on listen
    pub port: u16,
    /// Filesystem path of a named pipe
    pub filename: String,
    /// Advisory bandwidth in KB/s, 0 for unknown
    pub bandwidth: u32,
}

impl ConnectionDescription {
    pub fn new(connection_type: ConnectionType) -> Self {
        Self {
            connection_type,
            hostname: String::new(),
            interface: String::new(),
            port: 0,
            filename: String::new(),
            bandwidth: 0,
        }
    }

    pub fn tcp(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            ..Self::new(ConnectionType::TcpIp)
        }
    }

    pub fn named_pipe(path: impl Into<PathBuf>) -> Self {
        Self {
            filename: path.into().to_string_lossy().into_owned(),
            ..Self::new(ConnectionType::NamedPipe)
        }
    }

    pub fn pipe() -> Self {
        Self::new(ConnectionType::Pipe)
    }

    pub fn multicast(group: &str, port: u16) -> Self {
        Self {
            hostname: group.to_string(),
            port,
            ..Self::new(ConnectionType::Multicast)
        }
    }

    /// Sets the local interface used for multicast
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = interface.to_string();
        self
    }

    /// Whether both describe the same endpoint, ignoring bandwidth
    pub fn is_same_endpoint(&self, other: &Self) -> bool {
        if self.connection_type != other.connection_type {
            return false;
        }
        match self.connection_type {
            ConnectionType::TcpIp | ConnectionType::Multicast => {
                self.hostname == other.hostname && self.port == other.port
            }
            ConnectionType::NamedPipe => self.filename == other.filename,
            ConnectionType::Pipe => false,
        }
    }
}

impl Default for ConnectionDescription {
    fn default() -> Self {
        Self::tcp("", DEFAULT_PORT)
    }
}

/// `TCPIP:host:port`, `UDP:group:port`, `NAMEDPIPE:path` or `PIPE`
impl fmt::Display for ConnectionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.connection_type {
            ConnectionType::TcpIp => write!(f, "TCPIP:{}:{}", self.hostname, self.port),
            ConnectionType::NamedPipe => write!(f, "NAMEDPIPE:{}", self.filename),
            ConnectionType::Pipe => write!(f, "PIPE"),
            ConnectionType::Multicast => write!(f, "UDP:{}:{}", self.hostname, self.port),
        }
    }
}

impl FromStr for ConnectionDescription {
    type Err = ConnectionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConnectionError::InvalidDescription {
            text: text.to_string(),
            reason,
        };

        let (kind, rest) = match text.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (text, None),
        };

        match kind.to_ascii_uppercase().as_str() {
            "TCPIP" | "UDP" => {
                let rest = rest.ok_or_else(|| invalid("missing host and port"))?;
                // host names may not contain ':', so the port is after the last one
                let (hostname, port) = match rest.rsplit_once(':') {
                    Some((hostname, port)) => {
                        let port = port.parse().map_err(|_| invalid("bad port"))?;
                        (hostname, port)
                    }
                    None => (rest, DEFAULT_PORT),
                };
                if kind.eq_ignore_ascii_case("UDP") {
                    Ok(Self::multicast(hostname, port))
                } else {
                    Ok(Self::tcp(hostname, port))
                }
            }
            "NAMEDPIPE" => match rest {
                Some(path) if !path.is_empty() => Ok(Self::named_pipe(path)),
                _ => Err(invalid("missing pipe path")),
            },
            "PIPE" if rest.is_none() => Ok(Self::pipe()),
            _ => Err(invalid("unknown connection type")),
        }
    }
}

impl Serde for ConnectionDescription {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        self.connection_type.ser(writer);
        self.hostname.ser(writer);
        self.interface.ser(writer);
        self.port.ser(writer);
        self.filename.ser(writer);
        self.bandwidth.ser(writer);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        Ok(Self {
            connection_type: ConnectionType::de(reader)?,
            hostname: String::de(reader)?,
            interface: String::de(reader)?,
            port: u16::de(reader)?,
            filename: String::de(reader)?,
            bandwidth: u32::de(reader)?,
        })
    }

    fn byte_length(&self) -> usize {
        self.connection_type.byte_length()
            + self.hostname.byte_length()
            + self.interface.byte_length()
            + self.port.byte_length()
            + self.filename.byte_length()
            + self.bandwidth.byte_length()
    }
}
