use thiserror::Error;

/// Errors raised while reading values out of a byte stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// The reader ran out of bytes before the value was complete
    #[error("Unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    /// The bytes do not encode a valid value of the requested type
    #[error("Invalid encoding for {type_name}")]
    InvalidValue { type_name: &'static str },

    /// A length prefix exceeds what the remaining buffer could hold
    #[error("Length prefix {length} exceeds the {remaining} bytes remaining")]
    LengthOverflow { length: u64, remaining: usize },
}
