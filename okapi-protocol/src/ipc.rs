//! The IPC message layer carried inside segments of type 3.
//!
//! IPC messages are the gameplay-level protocol. Each one starts with an
//! [`IpcHeader`] whose `op_code` field identifies the message semantics. This
//! observer never enumerates the opcode space: the only opcodes that matter
//! are the ping pair, and those are discovered from traffic shape at runtime.

use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::serialization::{wire_deserialize_at, ParseError, WireDeserialize, WireSerialize};

#[cfg(test)]
use proptest_derive::Arbitrary;

#[cfg(test)]
mod tests;

/// The fixed offset the server adds to an echoed 32-bit client ping timestamp
/// when widening it into its 64-bit reply timestamp.
///
/// Subtracting it from a server ping timestamp recovers the client's ping
/// index.
pub const TIMESTAMP_DELTA: u64 = 0x0000_014D_0000_0000;

/// The common header in front of every IPC payload.
///
/// Fixed 16-byte little-endian layout: `reserved1` at offset 0, `reserved2`
/// at 1, `op_code` at 2, `unknown2` at 4, `server_id` at 6, `timestamp` at 8,
/// `unknown_c` at 12.
///
/// The two lead bytes are `0x14, 0x00` in most captures but are not
/// validated: observed traffic varies across client builds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct IpcHeader {
    /// First lead byte, unvalidated.
    pub reserved1: u8,
    /// Second lead byte, unvalidated.
    pub reserved2: u8,
    /// The opcode used to dispatch the IPC payload.
    pub op_code: u16,
    /// Bytes 4..6, no known meaning.
    pub unknown2: u16,
    /// Originating world server id.
    pub server_id: u16,
    /// Sender-side timestamp, in seconds.
    pub timestamp: u32,
    /// Bytes 12..16, no known meaning.
    pub unknown_c: u32,
}

impl WireDeserialize for IpcHeader {
    const WIRE_SIZE: usize = 16;

    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, ParseError> {
        Ok(IpcHeader {
            reserved1: reader.read_u8()?,
            reserved2: reader.read_u8()?,
            op_code: reader.read_u16::<LittleEndian>()?,
            unknown2: reader.read_u16::<LittleEndian>()?,
            server_id: reader.read_u16::<LittleEndian>()?,
            timestamp: reader.read_u32::<LittleEndian>()?,
            unknown_c: reader.read_u32::<LittleEndian>()?,
        })
    }
}

impl WireSerialize for IpcHeader {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u8(self.reserved1)?;
        writer.write_u8(self.reserved2)?;
        writer.write_u16::<LittleEndian>(self.op_code)?;
        writer.write_u16::<LittleEndian>(self.unknown2)?;
        writer.write_u16::<LittleEndian>(self.server_id)?;
        writer.write_u32::<LittleEndian>(self.timestamp)?;
        writer.write_u32::<LittleEndian>(self.unknown_c)?;
        Ok(())
    }
}

/// The payload of a client-sent ping message.
///
/// 24 bytes: a 32-bit timestamp followed by 20 reserved bytes. The reserved
/// bytes are zero in genuine pings, which the opcode detector uses as a
/// sanity signature.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct ClientPingData {
    /// The ping index echoed back by the server.
    pub timestamp: u32,
    /// Zero-filled in genuine pings.
    pub reserved: [u8; 20],
}

impl WireDeserialize for ClientPingData {
    const WIRE_SIZE: usize = 24;

    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, ParseError> {
        let timestamp = reader.read_u32::<LittleEndian>()?;
        let mut reserved = [0u8; 20];
        reader.read_exact(&mut reserved)?;
        Ok(ClientPingData {
            timestamp,
            reserved,
        })
    }
}

impl WireSerialize for ClientPingData {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u32::<LittleEndian>(self.timestamp)?;
        writer.write_all(&self.reserved)?;
        Ok(())
    }
}

/// The payload of a server-sent ping response.
///
/// 32 bytes: a 64-bit timestamp followed by 24 reserved bytes. The timestamp
/// is the echoed client timestamp plus [`TIMESTAMP_DELTA`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct ServerPingData {
    /// The widened echo of the client ping timestamp.
    pub timestamp: u64,
    /// Zero-filled in genuine ping responses.
    pub reserved: [u8; 24],
}

impl WireDeserialize for ServerPingData {
    const WIRE_SIZE: usize = 32;

    fn wire_deserialize<R: io::Read>(mut reader: R) -> Result<Self, ParseError> {
        let timestamp = reader.read_u64::<LittleEndian>()?;
        let mut reserved = [0u8; 24];
        reader.read_exact(&mut reserved)?;
        Ok(ServerPingData {
            timestamp,
            reserved,
        })
    }
}

impl WireSerialize for ServerPingData {
    fn wire_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        writer.write_u64::<LittleEndian>(self.timestamp)?;
        writer.write_all(&self.reserved)?;
        Ok(())
    }
}

/// Parse an [`IpcHeader`] at `offset`, returning the bytes consumed and the
/// header.
///
/// Fails with [`ParseError::Incomplete`] when the buffer is too short. There
/// is no structural validation beyond length: the reserved lead bytes are
/// accepted as-is. Payload parsing continues at `offset + consumed`.
pub fn parse_ipc_header(buffer: &[u8], offset: usize) -> Result<(usize, IpcHeader), ParseError> {
    wire_deserialize_at(buffer, offset)
}
