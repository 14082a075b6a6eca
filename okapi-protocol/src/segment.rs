//! Segment framing for the game's transport stream.
//!
//! Every transport chunk starts with a [`SegmentHeader`]. The header is never
//! encrypted or compressed, even when the payload behind it is, so it can
//! always be dissected from a raw capture. Segment type codes are
//! direction-specific: the client and server use different codes for their
//! keep-alives.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::serialization::{
    wire_deserialize_at, ParseError, WireDeserialize, WireSerialize, MAX_SEGMENT_LEN,
};

#[cfg(test)]
use proptest_derive::Arbitrary;


/// The per-segment framing header.
///
/// Fixed 16-byte little-endian layout: `size` at offset 0, `source_actor_id`
/// at 4, `target_actor_id` at 8, `segment_type` at 12, `reserved` at 14.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct SegmentHeader {
    /// The size of the segment header and its payload, in bytes.
    pub size: u32,
    /// The session id this segment describes.
    pub source_actor_id: u32,
    /// The session id this segment is being delivered to.
    pub target_actor_id: u32,
    /// The segment type code, interpreted against [`ClientSegmentType`] or
    /// [`ServerSegmentType`] depending on direction.
    pub segment_type: u16,
    /// Trailing header bytes with no known meaning.
    pub reserved: u16,
}

impl WireDeserialize for SegmentHeader {
    const WIRE_SIZE: usize = 16;

    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, ParseError> {
        Ok(SegmentHeader {
            size: reader.read_u32::<LittleEndian>()?,
            source_actor_id: reader.read_u32::<LittleEndian>()?,
            target_actor_id: reader.read_u32::<LittleEndian>()?,
            segment_type: reader.read_u16::<LittleEndian>()?,
            reserved: reader.read_u16::<LittleEndian>()?,
        })
    }
}

impl WireSerialize for SegmentHeader {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(self.size)?;
        writer.write_u32::<LittleEndian>(self.source_actor_id)?;
        writer.write_u32::<LittleEndian>(self.target_actor_id)?;
        writer.write_u16::<LittleEndian>(self.segment_type)?;
        writer.write_u16::<LittleEndian>(self.reserved)?;
        Ok(())
    }
}

/// Segment types sent by the client.
///
/// Only the types this observer cares about are listed; the protocol has
/// more.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum ClientSegmentType {
    /// A gameplay message carrying an [`IpcHeader`](crate::ipc::IpcHeader).
    Ipc = 3,
    /// A keep-alive request carrying [`KeepAliveData`].
    KeepAlive = 7,
}

impl ClientSegmentType {
    /// Interpret a wire segment type code for client-sent traffic.
    ///
    /// Unlisted codes return `None`: they are valid traffic this observer
    /// ignores.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            3 => Some(ClientSegmentType::Ipc),
            7 => Some(ClientSegmentType::KeepAlive),
            _ => None,
        }
    }
}

/// Segment types sent by the server.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum ServerSegmentType {
    /// A gameplay message carrying an [`IpcHeader`](crate::ipc::IpcHeader).
    Ipc = 3,
    /// A keep-alive response carrying [`KeepAliveData`].
    KeepAlive = 8,
}

impl ServerSegmentType {
    /// Interpret a wire segment type code for server-sent traffic.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            3 => Some(ServerSegmentType::Ipc),
            8 => Some(ServerSegmentType::KeepAlive),
            _ => None,
        }
    }
}

/// The payload of a keep-alive segment, identical in both directions.
///
/// 8-byte layout: `id` at offset 0, `timestamp` at 4.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct KeepAliveData {
    /// Echo id: the server repeats the id of the client request it answers.
    pub id: u32,
    /// Sender-side timestamp, in seconds.
    pub timestamp: u32,
}

impl WireDeserialize for KeepAliveData {
    const WIRE_SIZE: usize = 8;

    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, ParseError> {
        Ok(KeepAliveData {
            id: reader.read_u32::<LittleEndian>()?,
            timestamp: reader.read_u32::<LittleEndian>()?,
        })
    }
}

impl WireSerialize for KeepAliveData {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(self.id)?;
        writer.write_u32::<LittleEndian>(self.timestamp)?;
        Ok(())
    }
}

/// Parse a [`SegmentHeader`] at `offset`, returning the bytes consumed and
/// the header.
///
/// Fails with [`ParseError::Incomplete`] when the buffer is too short, and
/// [`ParseError::Malformed`] when the header claims a size over
/// [`MAX_SEGMENT_LEN`]. Payload parsing continues at `offset + consumed`.
pub fn parse_segment_header(
    buffer: &[u8],
    offset: usize,
) -> Result<(usize, SegmentHeader), ParseError> {
    let (consumed, header) = wire_deserialize_at::<SegmentHeader>(buffer, offset)?;
    if header.size as usize > MAX_SEGMENT_LEN {
        return Err(ParseError::Malformed("segment size over MAX_SEGMENT_LEN"));
    }

    Ok((consumed, header))
}
