//! Distributed FIFO queue. A `QueueMaster` holds the items; `QueueSlave`s
//! on other nodes request them, each item going to exactly one slave.

mod master;
mod slave;

pub use master::QueueMaster;
pub use slave::QueueSlave;

use coterie_shared::{ByteReader, ByteWrite, ByteWriter, Serde, SerdeErr};

use crate::object::{ChangeType, DirtyBits, Distributable};

/// The object carrying a queue's identity. Items travel outside of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct QueueInfo;

impl Distributable for QueueInfo {
    fn change_type(&self) -> ChangeType {
        ChangeType::Static
    }

    fn serialize(&self, _: &mut dyn ByteWrite, _: DirtyBits) {}

    fn deserialize(&mut self, _: &mut ByteReader, _: DirtyBits) -> Result<(), SerdeErr> {
        Ok(())
    }

    fn dirty_bits(&self) -> DirtyBits {
        DirtyBits::NONE
    }

    fn reset_dirty(&mut self) {}
}

fn encode_item<T: Serde>(item: &T) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(item.byte_length());
    item.ser(&mut writer);
    writer.to_bytes()
}

fn decode_item<T: Serde>(bytes: &[u8]) -> Result<T, SerdeErr> {
    T::de(&mut ByteReader::new(bytes))
}
