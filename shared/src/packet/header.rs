use coterie_serde::{ByteReader, ByteWrite, ConstByteLength, Serde, SerdeErr};

use super::{error::PacketError, packet_type::PacketType};

/// size (8) + type (4) + command (4)
pub const HEADER_SIZE: usize = 16;
/// Upper bound on a single packet, checked before any buffer is allocated
pub const MAX_PACKET_SIZE: u64 = 256 * 1024 * 1024;

/// Fixed header in front of every packet:
/// `[size:8][type:4][command:4]`, where size counts the whole packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub size: u64,
    pub packet_type: PacketType,
    pub command: u32,
}

impl PacketHeader {
    /// Checks a size field read off the wire before the rest is received
    pub fn check_size(size: u64) -> Result<(), PacketError> {
        if size < HEADER_SIZE as u64 {
            return Err(PacketError::Truncated {
                size,
                header_size: HEADER_SIZE,
            });
        }
        if size > MAX_PACKET_SIZE {
            return Err(PacketError::TooLarge {
                size,
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(())
    }

    /// Parses the header at the front of a complete packet
    pub fn parse(packet: &[u8]) -> Result<Self, PacketError> {
        let mut reader = ByteReader::new(packet);
        let size = u64::de(&mut reader).map_err(|_| PacketError::Truncated {
            size: packet.len() as u64,
            header_size: HEADER_SIZE,
        })?;
        Self::check_size(size)?;
        let truncated = || PacketError::Truncated {
            size,
            header_size: HEADER_SIZE,
        };
        let packet_type = u32::de(&mut reader).map_err(|_| truncated())?;
        let packet_type = PacketType::try_from(packet_type)?;
        let command = u32::de(&mut reader).map_err(|_| truncated())?;

        Ok(Self {
            size,
            packet_type,
            command,
        })
    }
}

impl Serde for PacketHeader {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        self.size.ser(writer);
        self.packet_type.ser(writer);
        self.command.ser(writer);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let size = u64::de(reader)?;
        let packet_type = PacketType::de(reader)?;
        let command = u32::de(reader)?;
        Ok(Self {
            size,
            packet_type,
            command,
        })
    }

    fn byte_length(&self) -> usize {
        HEADER_SIZE
    }
}

impl ConstByteLength for PacketHeader {
    fn const_byte_length() -> usize {
        HEADER_SIZE
    }
}
