use std::io;

/// Wire serialization for the game's fixed-layout structures.
///
/// The inverse of [`WireDeserialize`](super::WireDeserialize), writing the
/// same little-endian layout.
pub trait WireSerialize: Sized {
    /// Write `self` to the given `writer` using the canonical wire format.
    ///
    /// Notice that the error type is [`std::io::Error`]; this indicates that
    /// serialization MUST be infallible up to errors in the underlying writer.
    /// In other words, any type implementing `WireSerialize` must make illegal
    /// states unrepresentable.
    fn wire_serialize<W: io::Write>(&self, writer: W) -> Result<(), io::Error>;

    /// Helper function to construct a vec to serialize the current struct into
    fn wire_serialize_to_vec(&self) -> Result<Vec<u8>, io::Error> {
        let mut data = Vec::new();
        self.wire_serialize(&mut data)?;
        Ok(data)
    }
}

/// The largest size a segment can claim in its header.
///
/// Any segment whose `size` field exceeds this is treated as malformed, not
/// merely suspicious.
pub const MAX_SEGMENT_LEN: usize = 256 * 1024;
