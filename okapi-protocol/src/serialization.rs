//! Wire serialization for the game's transport stream.
//!
//! This module contains two traits: `WireSerialize` and `WireDeserialize`,
//! analogs of the Serde `Serialize` and `Deserialize` traits but intended for
//! the game's fixed-layout little-endian wire structures, plus
//! `wire_deserialize_at` for reading a structure at a byte offset inside a
//! captured chunk.

mod error;
mod wire_deserialize;
mod wire_serialize;

pub use error::ParseError;
pub use wire_deserialize::{wire_deserialize_at, WireDeserialize, WireDeserializeInto};
pub use wire_serialize::{WireSerialize, MAX_SEGMENT_LEN};
