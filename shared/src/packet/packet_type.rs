// The packet family, first routing key of every packet on the wire

use coterie_serde::{ByteReader, ByteWrite, ConstByteLength, Serde, SerdeErr};

use super::error::PacketError;

/// First packet type value available to the application layer
pub const PACKETTYPE_CUSTOM: u32 = 128;

#[derive(Copy, Debug, Clone, Eq, PartialEq, Hash)]
pub enum PacketType {
    // Handshake, disconnect, ping and other node control traffic
    Node,
    // Object mapping, versioned data and unsubscription
    Object,
    // Barrier enter / release
    Barrier,
    // Distributed queue item requests and grants
    Queue,
    // Application defined family, always >= PACKETTYPE_CUSTOM
    Custom(u32),
}

impl PacketType {
    pub fn to_u32(self) -> u32 {
        match self {
            PacketType::Node => 0,
            PacketType::Object => 1,
            PacketType::Barrier => 2,
            PacketType::Queue => 3,
            PacketType::Custom(value) => value,
        }
    }

    /// Whether packets of this family are addressed to an object and start
    /// with its identifier
    pub fn is_object_family(self) -> bool {
        matches!(self, PacketType::Object | PacketType::Barrier | PacketType::Queue)
    }
}

impl TryFrom<u32> for PacketType {
    type Error = PacketError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketType::Node),
            1 => Ok(PacketType::Object),
            2 => Ok(PacketType::Barrier),
            3 => Ok(PacketType::Queue),
            value if value >= PACKETTYPE_CUSTOM => Ok(PacketType::Custom(value)),
            // SECURITY: reserved values come from a newer or malicious peer,
            // reject instead of guessing
            value => Err(PacketError::InvalidPacketType { value }),
        }
    }
}

impl Serde for PacketType {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        self.to_u32().ser(writer);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let value = u32::de(reader)?;
        PacketType::try_from(value).map_err(|_| SerdeErr::InvalidValue {
            type_name: "PacketType",
        })
    }

    fn byte_length(&self) -> usize {
        <Self as ConstByteLength>::const_byte_length()
    }
}

impl ConstByteLength for PacketType {
    fn const_byte_length() -> usize {
        4
    }
}
