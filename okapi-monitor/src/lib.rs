//! A passive ping observer for captured game connections.
//!
//! This crate consumes the chunks a capture layer lifts off the wire and
//! turns them into latency signals, without injecting any traffic of its
//! own. It is built from a small number of pieces:
//!
//!  * [`ConnectionRegistry`], the entry point. The capture layer reports
//!    each sent or received chunk together with the connection it belongs
//!    to. The registry routes the chunk to a per-connection monitor, expires
//!    monitors for idle connections, and aggregates a process-wide current
//!    ping.
//!  * [`PerConnectionMonitor`], which frames one connection's chunks into
//!    segments and produces one ping sample per completed exchange, from
//!    keep-alive echoes and from the IPC ping opcode pair.
//!  * An opcode detector, which recovers the IPC ping opcode pair from
//!    traffic statistics. The pair is not part of any published protocol
//!    and changes between game patches, so it has to be learned from the
//!    traffic itself.
//!
//! Results flow out in three ways: a [`broadcast`] stream of [`PingEvent`]s,
//! a [`watch`] channel carrying the latest aggregate ping, and direct
//! queries on the registry.
//!
//! Timestamps come from the caller. Every reporting method has an `*_at`
//! variant taking an explicit [`DateTime<Utc>`](chrono::DateTime), which
//! replay tools use to process captures at their original pace.
//!
//! [`broadcast`]: tokio::sync::broadcast
//! [`watch`]: tokio::sync::watch

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod constants;

mod connection;
mod connection_id;
mod latency;
mod registry;

pub use crate::{
    config::Config,
    connection::{MonitorUpdate, PerConnectionMonitor},
    connection_id::ConnectionId,
    latency::{PingOpcodePair, PingSample},
    registry::{ConnectionPing, ConnectionRegistry, PingEvent},
};
