//! Definitions of constants.

use std::time::Duration;

/// The length of the sliding window over which a connection's current ping
/// is the minimum observed sample.
///
/// Ping exchanges complete every second or two under normal traffic. Five
/// seconds rides out a missed exchange without hiding a real latency shift
/// for long.
pub const PING_SAMPLE_WINDOW: Duration = Duration::from_secs(5);

/// How long a connection may stay silent before the registry drops its
/// monitor.
///
/// The game sends keep-alives well inside this interval, so an expiry means
/// the connection is gone, not quiet.
pub const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(120);

/// The maximum time distance from the latest keep-alive within which a
/// recorded send is considered when correlating ping traffic.
pub const DETECTION_TIME_WINDOW: Duration = Duration::from_secs(20);

/// How many recent ping-shaped sends the opcode detector remembers per
/// connection.
///
/// Must be a power of two, because ring positions are reduced by masking.
pub const DETECTION_RING_CAPACITY: usize = 512;

/// The capacity of the broadcast channel carrying
/// [`PingEvent`](crate::PingEvent)s.
///
/// A subscriber that falls this far behind starts losing events rather than
/// blocking the capture path.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;
