use std::io;

use super::ParseError;

/// Wire deserialization for the game's fixed-layout structures.
///
/// Every implementor occupies exactly [`WIRE_SIZE`](Self::WIRE_SIZE) bytes on
/// the wire, with all multi-byte fields little-endian. Typed reads through the
/// reader perform the endianness correction on any host byte order without
/// touching the source buffer.
pub trait WireDeserialize: Sized {
    /// The exact number of bytes this structure occupies on the wire.
    const WIRE_SIZE: usize;

    /// Try to read `self` from the given `reader`.
    fn wire_deserialize<R: io::Read>(reader: R) -> Result<Self, ParseError>;
}

/// Helper for deserializing more succinctly via type inference
pub trait WireDeserializeInto {
    /// Deserialize based on type inference
    fn wire_deserialize_into<T>(self) -> Result<T, ParseError>
    where
        T: WireDeserialize;
}

impl<R: io::Read> WireDeserializeInto for R {
    fn wire_deserialize_into<T>(self) -> Result<T, ParseError>
    where
        T: WireDeserialize,
    {
        T::wire_deserialize(self)
    }
}

/// Read a `T` starting at `offset` into `buffer`, returning the number of
/// bytes consumed and the value.
///
/// Fails with [`ParseError::Incomplete`] when fewer than
/// [`T::WIRE_SIZE`](WireDeserialize::WIRE_SIZE) bytes remain past `offset`,
/// including when `offset` is beyond the end of the buffer. The bounds check
/// happens before any field read, and the buffer is never modified, so callers
/// can keep re-slicing the same chunk afterwards.
pub fn wire_deserialize_at<T: WireDeserialize>(
    buffer: &[u8],
    offset: usize,
) -> Result<(usize, T), ParseError> {
    let bytes = buffer.get(offset..).ok_or(ParseError::Incomplete)?;
    if bytes.len() < T::WIRE_SIZE {
        return Err(ParseError::Incomplete);
    }

    let value = T::wire_deserialize(bytes)?;
    Ok((T::WIRE_SIZE, value))
}

#[cfg(test)]
mod tests {
    use byteorder::{LittleEndian, ReadBytesExt};

    use super::*;

    #[derive(Debug)]
    struct Pair {
        first: u16,
        second: u16,
    }

    impl WireDeserialize for Pair {
        const WIRE_SIZE: usize = 4;

        fn wire_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, ParseError> {
            Ok(Pair {
                first: reader.read_u16::<LittleEndian>()?,
                second: reader.read_u16::<LittleEndian>()?,
            })
        }
    }

    #[test]
    fn reads_at_offset_without_consuming_the_buffer() {
        okapi_test::init();

        let buffer = [0xaa, 0x01, 0x02, 0x03, 0x04, 0xbb];

        let (consumed, pair) = wire_deserialize_at::<Pair>(&buffer, 1).expect("enough bytes");
        assert_eq!(consumed, Pair::WIRE_SIZE);
        assert_eq!(pair.first, 0x0201);
        assert_eq!(pair.second, 0x0403);

        // The same buffer parses again, trailing bytes intact.
        let (_, again) = wire_deserialize_at::<Pair>(&buffer, 1).expect("enough bytes");
        assert_eq!(again.first, 0x0201);
        assert_eq!(buffer[5], 0xbb);
    }

    #[test]
    fn short_buffers_are_incomplete() {
        okapi_test::init();

        let buffer = [0x01, 0x02, 0x03, 0x04];

        assert_eq!(
            wire_deserialize_at::<Pair>(&buffer, 1).unwrap_err(),
            ParseError::Incomplete,
        );
        assert_eq!(
            wire_deserialize_at::<Pair>(&buffer, buffer.len()).unwrap_err(),
            ParseError::Incomplete,
        );
        // An offset past the end is incomplete, not a panic.
        assert_eq!(
            wire_deserialize_at::<Pair>(&buffer, buffer.len() + 10).unwrap_err(),
            ParseError::Incomplete,
        );
    }
}
