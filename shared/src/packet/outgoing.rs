use coterie_serde::{ByteWrite, ByteWriter, Serde};

use crate::types::ObjectId;

use super::{
    header::{PacketHeader, HEADER_SIZE},
    packet_type::PacketType,
};

/// Builds one packet: the header is written up front with a zero size and
/// patched once the payload is complete
pub struct OutgoingPacket {
    packet_type: PacketType,
    command: u32,
    writer: ByteWriter,
}

impl OutgoingPacket {
    pub fn new(packet_type: PacketType, command: u32) -> Self {
        let mut writer = ByteWriter::with_capacity(64);
        PacketHeader {
            size: 0,
            packet_type,
            command,
        }
        .ser(&mut writer);

        Self {
            packet_type,
            command,
            writer,
        }
    }

    /// A packet addressed to an object: the object id follows the header
    pub fn for_object(packet_type: PacketType, command: u32, object_id: &ObjectId) -> Self {
        debug_assert!(packet_type.is_object_family());
        let mut packet = Self::new(packet_type, command);
        object_id.ser(&mut packet.writer);
        packet
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn command(&self) -> u32 {
        self.command
    }

    pub fn write<T: Serde>(&mut self, value: &T) -> &mut Self {
        value.ser(&mut self.writer);
        self
    }

    /// Appends raw, already serialized bytes
    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.writer.write_bytes(bytes);
        self
    }

    pub fn writer(&mut self) -> &mut dyn ByteWrite {
        &mut self.writer
    }

    pub fn len(&self) -> usize {
        self.writer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writer.len() <= HEADER_SIZE
    }

    /// Patches the size field and returns the bytes ready for `send`
    pub fn finish(mut self) -> Vec<u8> {
        let size = self.writer.len() as u64;
        // the header was written by `new`, so offset 0 is always in range
        let patched = self.writer.patch(0, &size.to_le_bytes());
        debug_assert!(patched);
        self.writer.to_bytes()
    }
}
