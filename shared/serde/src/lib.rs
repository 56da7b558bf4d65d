//! # Coterie Serde
//! Byte-oriented serialization for packets exchanged between coterie nodes.
//! Every integer goes on the wire in little-endian order, so peers of
//! different native endianness read each other's packets without swapping.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod byte_reader;
mod byte_writer;
mod error;
mod impls;
mod serde;

pub use byte_reader::ByteReader;
pub use byte_writer::{ByteCounter, ByteWrite, ByteWriter};
pub use error::SerdeErr;
pub use serde::{ConstByteLength, Serde};
