use crate::{
    byte_reader::ByteReader, byte_writer::ByteWrite, error::SerdeErr, serde::ConstByteLength,
    Serde,
};

// Integers & floats

macro_rules! impl_serde_number {
    ($($ty:ty),*) => {
        $(
            impl Serde for $ty {
                fn ser(&self, writer: &mut dyn ByteWrite) {
                    writer.write_bytes(&self.to_le_bytes());
                }

                fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
                    let bytes = reader.read_bytes(std::mem::size_of::<$ty>())?;
                    let array = bytes
                        .try_into()
                        .map_err(|_| SerdeErr::InvalidValue { type_name: stringify!($ty) })?;
                    Ok(<$ty>::from_le_bytes(array))
                }

                fn byte_length(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }
            }

            impl ConstByteLength for $ty {
                fn const_byte_length() -> usize {
                    std::mem::size_of::<$ty>()
                }
            }
        )*
    };
}

impl_serde_number!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

// usize travels as u64 so 32 and 64 bit peers agree on its size
impl Serde for usize {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        (*self as u64).ser(writer);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let value = u64::de(reader)?;
        usize::try_from(value).map_err(|_| SerdeErr::InvalidValue { type_name: "usize" })
    }

    fn byte_length(&self) -> usize {
        8
    }
}

impl Serde for bool {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        writer.write_byte(u8::from(*self));
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        match reader.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerdeErr::InvalidValue { type_name: "bool" }),
        }
    }

    fn byte_length(&self) -> usize {
        1
    }
}

impl ConstByteLength for bool {
    fn const_byte_length() -> usize {
        1
    }
}

impl Serde for () {
    fn ser(&self, _: &mut dyn ByteWrite) {}

    fn de(_: &mut ByteReader) -> Result<Self, SerdeErr> {
        Ok(())
    }

    fn byte_length(&self) -> usize {
        0
    }
}

// Containers

fn read_length(reader: &mut ByteReader, min_item_size: usize) -> Result<usize, SerdeErr> {
    let length = u64::de(reader)?;
    // reject lengths the buffer cannot possibly satisfy before allocating
    let needed = length.saturating_mul(min_item_size as u64);
    if needed > reader.remaining() as u64 {
        return Err(SerdeErr::LengthOverflow {
            length,
            remaining: reader.remaining(),
        });
    }
    usize::try_from(length).map_err(|_| SerdeErr::LengthOverflow {
        length,
        remaining: reader.remaining(),
    })
}

impl Serde for String {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        (self.len() as u64).ser(writer);
        writer.write_bytes(self.as_bytes());
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        let length = read_length(reader, 1)?;
        let bytes = reader.read_bytes(length)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SerdeErr::InvalidValue { type_name: "String" })
    }

    fn byte_length(&self) -> usize {
        8 + self.len()
    }
}

impl<T: Serde> Serde for Vec<T> {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        (self.len() as u64).ser(writer);
        for item in self {
            item.ser(writer);
        }
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        // every item takes at least one byte except unit, which is never sent in bulk
        let length = read_length(reader, 1)?;
        let mut output = Vec::with_capacity(length.min(reader.remaining()));
        for _ in 0..length {
            output.push(T::de(reader)?);
        }
        Ok(output)
    }

    fn byte_length(&self) -> usize {
        8 + self.iter().map(Serde::byte_length).sum::<usize>()
    }
}

impl<T: Serde> Serde for Option<T> {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        match self {
            Some(value) => {
                true.ser(writer);
                value.ser(writer);
            }
            None => false.ser(writer),
        }
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        if bool::de(reader)? {
            Ok(Some(T::de(reader)?))
        } else {
            Ok(None)
        }
    }

    fn byte_length(&self) -> usize {
        1 + self.as_ref().map_or(0, Serde::byte_length)
    }
}

impl<A: Serde, B: Serde> Serde for (A, B) {
    fn ser(&self, writer: &mut dyn ByteWrite) {
        self.0.ser(writer);
        self.1.ser(writer);
    }

    fn de(reader: &mut ByteReader) -> Result<Self, SerdeErr> {
        Ok((A::de(reader)?, B::de(reader)?))
    }

    fn byte_length(&self) -> usize {
        self.0.byte_length() + self.1.byte_length()
    }
}
