// Command ids and payloads of every packet the node layer exchanges.
// Object-family ids are unique across Object, Barrier and Queue packets
// since all three are routed through the same per-object dispatcher.

use coterie_shared::{
    ByteReader, ByteWrite, ConnectionDescription, InstanceId, NodeId, NodeType, ObjectId,
    RequestId, Serde, SerdeErr, Version,
};

// PacketType::Node
pub const CMD_NODE_CONNECT: u32 = 0;
pub const CMD_NODE_CONNECT_REPLY: u32 = 1;
pub const CMD_NODE_DISCONNECT: u32 = 2;
pub const CMD_NODE_PING: u32 = 3;
pub const CMD_NODE_PING_REPLY: u32 = 4;
pub const CMD_NODE_MULTICAST: u32 = 5;
pub const CMD_NODE_INSTANCE: u32 = 6;

// PacketType::Object
pub const CMD_OBJECT_MAP: u32 = 0x00;
pub const CMD_OBJECT_MAP_REPLY: u32 = 0x01;
pub const CMD_OBJECT_DELTA: u32 = 0x02;
pub const CMD_OBJECT_UNSUBSCRIBE: u32 = 0x03;

// PacketType::Barrier
pub const CMD_BARRIER_ENTER: u32 = 0x10;
pub const CMD_BARRIER_ENTER_REPLY: u32 = 0x11;

// PacketType::Queue
pub const CMD_QUEUE_GET_ITEMS: u32 = 0x20;
pub const CMD_QUEUE_ITEM: u32 = 0x21;
pub const CMD_QUEUE_EMPTY: u32 = 0x22;

/// Wire timeout value meaning "wait forever"
pub const TIMEOUT_INDEFINITE: u32 = u32::MAX;

macro_rules! packet {
    ($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl Serde for $name {
            fn ser(&self, writer: &mut dyn ByteWrite) {
                $(self.$field.ser(writer);)*
            }

            fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
                Ok(Self {
                    $($field: <$ty>::de(reader)?,)*
                })
            }

            fn byte_length(&self) -> usize {
                0 $(+ self.$field.byte_length())*
            }
        }
    };
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)*
        }

        impl Serde for $name {
            fn ser(&self, writer: &mut dyn ByteWrite) {
                let value: u32 = match self {
                    $($name::$variant => $value,)*
                };
                value.ser(writer);
            }

            fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
                match u32::de(reader)? {
                    $($value => Ok($name::$variant),)*
                    _ => Err(SerdeErr::InvalidValue {
                        type_name: stringify!($name),
                    }),
                }
            }

            fn byte_length(&self) -> usize {
                4
            }
        }
    };
}

wire_enum!(
    /// Outcome of a connect handshake
    ConnectResult {
        Accepted = 0,
        Refused = 1,
        /// Already connected to that node over another connection
        Duplicate = 2,
        SelfConnect = 3,
    }
);

wire_enum!(
    MapResult {
        Mapped = 0,
        NotFound = 1,
        VersionUnavailable = 2,
    }
);

packet!(
    NodeConnectPacket {
        node_id: NodeId,
        node_type: NodeType,
        request_id: RequestId,
        descriptions: Vec<ConnectionDescription>,
    }
);

packet!(
    NodeConnectReplyPacket {
        node_id: NodeId,
        node_type: NodeType,
        request_id: RequestId,
        result: ConnectResult,
        descriptions: Vec<ConnectionDescription>,
    }
);

packet!(
    /// Ping and its reply
    PingPacket { request_id: RequestId }
);

packet!(
    /// A complete packet sent once to a multicast group, for the listed
    /// members only. Group connections belong to no peer, so the sender
    /// travels along.
    MulticastPacket {
        sender: NodeId,
        targets: Vec<NodeId>,
        packet: Vec<u8>,
    }
);

packet!(
    /// Instance data a master pushes into the instance caches of other
    /// nodes
    InstancePushPacket {
        object_id: ObjectId,
        master_instance: InstanceId,
        version: Version,
        data: Vec<u8>,
    }
);

packet!(
    /// `cached_first..=cached_last` are the versions of master instance
    /// `cached_instance` the mapping node holds in its instance cache, both
    /// `VERSION_NONE` if it holds none
    MapObjectPacket {
        request_id: RequestId,
        version: Version,
        instance_id: InstanceId,
        cached_instance: InstanceId,
        cached_first: Version,
        cached_last: Version,
    }
);

packet!(
    /// `data` holds the instance data of `version`, absent when the mapping
    /// node has it cached
    MapObjectReplyPacket {
        request_id: RequestId,
        result: MapResult,
        master_instance: InstanceId,
        version: Version,
        data: Option<Vec<u8>>,
    }
);

packet!(UnsubscribeObjectPacket { instance_id: InstanceId });

packet!(
    BarrierEnterPacket {
        version: Version,
        incarnation: u64,
        timeout_ms: u32,
    }
);

packet!(BarrierEnterReplyPacket { version: Version });

packet!(QueueGetItemsPacket { request_id: RequestId, count: u32 });

packet!(QueueItemPacket { request_id: RequestId, item: Vec<u8> });

packet!(QueueEmptyPacket { request_id: RequestId });
