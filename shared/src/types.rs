use std::fmt;

use coterie_serde::{ByteReader, ByteWrite, ConstByteLength, Serde, SerdeErr};

/// Node-wide identifier of one attached object instance
pub type InstanceId = u32;
/// Identifies a request waiting on a reply, local to the node that issued it
pub type RequestId = u32;
/// Tag used to pick the node factory on the accepting side of a handshake
pub type NodeType = u32;

pub const NODETYPE_NODE: NodeType = 1;
pub const NODETYPE_CUSTOM: NodeType = 100;

pub const INSTANCE_INVALID: InstanceId = u32::MAX;
pub const REQUEST_INVALID: RequestId = u32::MAX;

/// A 128-bit identifier, sent as two little-endian 64 bit words
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Uuid {
    high: u64,
    low: u64,
}

impl Uuid {
    pub const ZERO: Uuid = Uuid { high: 0, low: 0 };

    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// A fresh random identifier, never `ZERO`
    pub fn generate() -> Self {
        loop {
            let id = Self::new(fastrand::u64(..), fastrand::u64(..));
            if id != Self::ZERO {
                return id;
            }
        }
    }

    pub fn high(&self) -> u64 {
        self.high
    }

    pub fn low(&self) -> u64 {
        self.low
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn to_u128(&self) -> u128 {
        (u128::from(self.high) << 64) | u128::from(self.low)
    }

    pub fn from_u128(value: u128) -> Self {
        Self::new((value >> 64) as u64, value as u64)
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.high, self.low)
    }
}

impl Serde for Uuid {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        self.high.ser(writer);
        self.low.ser(writer);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let high = u64::de(reader)?;
        let low = u64::de(reader)?;
        Ok(Self { high, low })
    }

    fn byte_length(&self) -> usize {
        Self::const_byte_length()
    }
}

impl ConstByteLength for Uuid {
    fn const_byte_length() -> usize {
        16
    }
}

pub type NodeId = Uuid;
pub type ObjectId = Uuid;

/// Object version. Real versions count up from `VERSION_FIRST`; the top of
/// the range is reserved for the sentinels below.
pub type Version = u64;

pub const VERSION_FIRST: Version = 0;
/// No version: an unmapped object, or "do not initialize" when mapping
pub const VERSION_NONE: Version = u64::MAX - 3;
/// The oldest version the master still retains
pub const VERSION_OLDEST: Version = u64::MAX - 2;
/// The newest version known locally
pub const VERSION_HEAD: Version = u64::MAX - 1;
pub const VERSION_INVALID: Version = u64::MAX;

/// Whether a version is an actual commit rather than a sentinel
pub fn is_concrete_version(version: Version) -> bool {
    version < VERSION_NONE
}
