//! Latency signals extracted from one connection's traffic.
//!
//! Two independent sources produce samples: keep-alive echoes, which are
//! always measurable, and IPC ping exchanges, which are only measurable once
//! the ping opcode pair is known. The detector recovers that pair from
//! traffic statistics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod detector;
mod ipc;
mod keep_alive;

pub(crate) use detector::PingOpcodeDetector;
pub(crate) use ipc::IpcPingHandler;
pub(crate) use keep_alive::KeepAliveHandler;

/// One measured ping exchange.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PingSample {
    /// Round-trip time in milliseconds.
    pub ping_ms: f64,
    /// When the response half of the exchange was observed.
    pub sampled_at: DateTime<Utc>,
}

/// The pair of IPC opcodes carrying ping traffic.
///
/// Not part of any published protocol, and reassigned between game patches,
/// which is why it is detected from traffic rather than hardcoded.
#[derive(Copy, Clone, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct PingOpcodePair {
    /// The opcode of the client-sent ping.
    pub client: u16,
    /// The opcode of the server-sent response.
    pub server: u16,
}

impl fmt::Debug for PingOpcodePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingOpcodePair")
            .field("client", &format_args!("{:#06x}", self.client))
            .field("server", &format_args!("{:#06x}", self.server))
            .finish()
    }
}

/// Signed milliseconds from `earlier` to `later`, at microsecond precision.
pub(crate) fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let elapsed = later.signed_duration_since(earlier);
    match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / 1_000.0,
        // Only overflows for spans of hundreds of thousands of years.
        None => elapsed.num_milliseconds() as f64,
    }
}
