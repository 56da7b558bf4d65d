//! # Coterie Shared
//! Building blocks shared by every coterie node: identifiers and versions,
//! packet framing, commands and their dispatch, and the connections nodes
//! talk over.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

cfg_if! {
    if #[cfg(not(unix))]
    {
        // Connections and the connection set are built on unix sockets and poll(2)
        compile_error!("the 'coterie-shared' crate currently supports unix targets only");
    }
}

pub use coterie_serde::{
    ByteCounter, ByteReader, ByteWrite, ByteWriter, ConstByteLength, Serde, SerdeErr,
};

mod command;
mod config;
mod connection;
mod connection_set;
mod context;
mod dispatcher;
mod error_registry;
mod packet;
mod sync;
mod types;
mod version_list;

pub use command::{Command, CommandCache, CommandQueue, PopError};
pub use config::{NodeConfig, ObjectConfig, QueueConfig};
pub use connection::{
    create as create_connection, pipe_pair, same_connection, Connection, ConnectionDescription,
    ConnectionError, ConnectionPtr, ConnectionState, ConnectionType, MulticastConnection,
    NamedPipeConnection, PipeConnection, TcpConnection, DEFAULT_MULTICAST_GROUP, DEFAULT_PORT,
    MAX_DATAGRAM_SIZE,
};
pub use connection_set::{ConnectionSet, ConnectionSetEvent};
pub use context::Context;
pub use dispatcher::{CommandHandler, DispatchError, Dispatcher};
pub use error_registry::*;
pub use packet::{
    error::PacketError,
    header::{PacketHeader, HEADER_SIZE, MAX_PACKET_SIZE},
    outgoing::OutgoingPacket,
    packet_type::{PacketType, PACKETTYPE_CUSTOM},
};
pub use sync::{lock, read, wait_until, write, Monitor};
pub use types::{
    is_concrete_version, InstanceId, NodeId, NodeType, ObjectId, RequestId, Uuid, Version,
    INSTANCE_INVALID, NODETYPE_CUSTOM, NODETYPE_NODE, REQUEST_INVALID, VERSION_FIRST,
    VERSION_HEAD, VERSION_INVALID, VERSION_NONE, VERSION_OLDEST,
};
pub use version_list::{VersionList, VersionListError};
