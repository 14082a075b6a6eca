//! Observer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{IDLE_CONNECTION_TIMEOUT, PING_SAMPLE_WINDOW},
    latency::PingOpcodePair,
};


/// Configuration for a [`ConnectionRegistry`](crate::ConnectionRegistry).
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The IPC ping opcode pair to use before any is detected.
    ///
    /// Opcode pairs change between game patches, so a configured pair is a
    /// head start rather than the truth: the first detector discovery on a
    /// connection replaces it. When `None`, IPC pings on a connection are
    /// not measured until its detector reports a pair. Keep-alive latency is
    /// measured either way.
    pub ping_op_code: Option<PingOpcodePair>,

    /// The width of the per-connection sample window.
    ///
    /// A connection's current ping is the minimum sample inside this window.
    #[serde(with = "humantime_serde")]
    pub ping_sample_window: Duration,

    /// How long a connection may stay silent before its monitor is dropped.
    #[serde(with = "humantime_serde")]
    pub idle_connection_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_op_code: None,
            ping_sample_window: PING_SAMPLE_WINDOW,
            idle_connection_timeout: IDLE_CONNECTION_TIMEOUT,
        }
    }
}
