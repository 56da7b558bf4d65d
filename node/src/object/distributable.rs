use std::ops::{BitOr, BitOrAssign};

use coterie_shared::{ByteReader, ByteWrite, ByteWriter, Serde, SerdeErr};

/// How commits of an object are distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Distributed once on mapping, never committed
    Static,
    /// Every commit carries the full state
    Instance,
    /// Commits carry only the dirty fields
    Delta,
}

/// Mask of changed fields, one bit per field as the object defines them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DirtyBits(pub u64);

impl DirtyBits {
    pub const NONE: DirtyBits = DirtyBits(0);
    /// Every field, i.e. the instance data
    pub const ALL: DirtyBits = DirtyBits(u64::MAX);

    pub const fn bit(index: u32) -> Self {
        DirtyBits(1 << index)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: DirtyBits) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: DirtyBits) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for DirtyBits {
    type Output = DirtyBits;

    fn bitor(self, rhs: Self) -> Self::Output {
        DirtyBits(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyBits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Data that can be shared as a versioned distributed object.
///
/// `serialize` writes the fields selected by `dirty` and `deserialize`
/// reads them back in the same order. Implementations track changes
/// themselves and report them through `dirty_bits`; a commit with no
/// dirty bits produces no new version.
pub trait Distributable: Send + 'static {
    fn change_type(&self) -> ChangeType {
        ChangeType::Delta
    }

    fn serialize(&self, writer: &mut dyn ByteWrite, dirty: DirtyBits);

    fn deserialize(&mut self, reader: &mut ByteReader, dirty: DirtyBits) -> Result<(), SerdeErr>;

    fn dirty_bits(&self) -> DirtyBits;

    fn reset_dirty(&mut self);
}

/// Payload layout shared by deltas and instance data: `{dirty, fields}`
pub(crate) fn encode<T: Distributable>(value: &T, dirty: DirtyBits) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    dirty.0.ser(&mut writer);
    value.serialize(&mut writer, dirty);
    writer.to_bytes()
}

pub(crate) fn decode<T: Distributable>(value: &mut T, payload: &[u8]) -> Result<(), SerdeErr> {
    let mut reader = ByteReader::new(payload);
    let dirty = DirtyBits(u64::de(&mut reader)?);
    value.deserialize(&mut reader, dirty)?;
    value.reset_dirty();
    Ok(())
}
