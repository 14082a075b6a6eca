//! Wire formats for the observed game protocol.
//!
//! The capture layer hands us discrete transport chunks. Each chunk starts
//! with a [`segment::SegmentHeader`] that frames one segment of the stream;
//! IPC segments carry a further [`ipc::IpcHeader`] in front of their payload.
//! Only the segment header is guaranteed to be readable in every capture, so
//! everything downstream of it parses defensively: a short buffer is
//! [`serialization::ParseError::Incomplete`], structural nonsense is
//! [`serialization::ParseError::Malformed`], and neither ever panics.
//!
//! All multi-byte fields are little-endian on the wire. Parsing never mutates
//! the source buffer, so callers can re-slice the same chunk for payload
//! handling after reading a header.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod ipc;
pub mod segment;
pub mod serialization;
