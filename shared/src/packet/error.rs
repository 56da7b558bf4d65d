use thiserror::Error;

/// Errors raised while framing or unframing packets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Packet type value inside the reserved range (SECURITY: potentially malicious packet)
    #[error("Invalid packet type {value}, possibly a malformed or malicious packet")]
    InvalidPacketType { value: u32 },

    /// Size field smaller than the fixed header
    #[error("Packet size {size} is smaller than the {header_size} byte header")]
    Truncated { size: u64, header_size: usize },

    /// Size field larger than the configured maximum (SECURITY: memory exhaustion)
    #[error("Packet size {size} exceeds the maximum of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    /// Object-family packet without a complete object identifier
    #[error("Object packet of {size} bytes is too short to carry an object id")]
    MissingObjectId { size: usize },
}
