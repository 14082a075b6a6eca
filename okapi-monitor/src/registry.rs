//! The connection registry, where captured traffic enters the observer.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace};

use crate::{
    config::Config,
    connection::{MonitorUpdate, PerConnectionMonitor},
    connection_id::ConnectionId,
    constants::EVENT_CHANNEL_CAPACITY,
    latency::PingOpcodePair,
};

#[cfg(test)]
mod tests;

/// One connection's current ping.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConnectionPing {
    /// The connection the ping was measured on.
    pub connection: ConnectionId,
    /// The connection's windowed minimum ping, in milliseconds.
    pub ping_ms: f64,
    /// When the sample that last refreshed this value was observed.
    pub sample_time: DateTime<Utc>,
}

/// Events broadcast by a [`ConnectionRegistry`] as traffic is dissected.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PingEvent {
    /// A connection completed a ping exchange and refreshed its current
    /// ping.
    ConnectionSample(ConnectionPing),
    /// The aggregate current ping, re-evaluated after each sample.
    ///
    /// This is the worst current ping across live connections, so a games
    /// overlay can show a single number per process.
    CurrentPing(ConnectionPing),
    /// A connection's IPC ping opcode pair was detected.
    OpcodeDetected {
        /// The connection whose traffic revealed the pair.
        connection: ConnectionId,
        /// The detected pair.
        op_code: PingOpcodePair,
    },
}

#[derive(Copy, Clone, Debug)]
enum Direction {
    Sent,
    Received,
}

/// Tracks ping across every observed connection.
///
/// The capture layer calls [`message_sent`] and [`message_received`] with
/// each chunk it lifts off the wire. The registry creates a
/// [`PerConnectionMonitor`] per connection identity on first sight, drops
/// monitors that stay silent past the configured idle timeout, and
/// republishes their samples as [`PingEvent`]s together with an aggregate
/// current ping.
///
/// All methods take `&self`; the registry is shared behind an `Arc` between
/// the capture layer and any consumers.
///
/// [`message_sent`]: Self::message_sent
/// [`message_received`]: Self::message_received
#[derive(Debug)]
pub struct ConnectionRegistry {
    config: Config,
    connections: Mutex<HashMap<ConnectionId, PerConnectionMonitor>>,
    events: broadcast::Sender<PingEvent>,
    current_ping: watch::Sender<Option<ConnectionPing>>,
}

impl ConnectionRegistry {
    /// Returns a registry with no connections observed yet.
    pub fn new(config: Config) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (current_ping, _) = watch::channel(None);

        ConnectionRegistry {
            config,
            connections: Mutex::new(HashMap::new()),
            events,
            current_ping,
        }
    }

    /// Reports a client-sent chunk observed on `connection` now.
    ///
    /// `connection` is the capture layer's connection identity, typically
    /// `"local=>remote"` socket addresses. `epoch` is the capture layer's
    /// own chunk counter; it is logged but plays no part in timing, which
    /// always comes from the observation clock.
    pub fn message_sent(&self, connection: &str, epoch: i64, message: &[u8]) {
        self.message_sent_at(connection, epoch, message, Utc::now());
    }

    /// Reports a client-sent chunk with an explicit observation time.
    ///
    /// Replay tools use this to process a capture at its original pace.
    pub fn message_sent_at(
        &self,
        connection: &str,
        epoch: i64,
        message: &[u8],
        now: DateTime<Utc>,
    ) {
        self.dispatch(connection, epoch, message, now, Direction::Sent);
    }

    /// Reports a server-sent chunk observed on `connection` now.
    pub fn message_received(&self, connection: &str, epoch: i64, message: &[u8]) {
        self.message_received_at(connection, epoch, message, Utc::now());
    }

    /// Reports a server-sent chunk with an explicit observation time.
    pub fn message_received_at(
        &self,
        connection: &str,
        epoch: i64,
        message: &[u8],
        now: DateTime<Utc>,
    ) {
        self.dispatch(connection, epoch, message, now, Direction::Received);
    }

    /// Subscribes to the event stream.
    ///
    /// Slow subscribers can miss events; the channel is bounded and lagging
    /// receivers skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<PingEvent> {
        self.events.subscribe()
    }

    /// Returns a watcher over the aggregate current ping.
    pub fn current_ping_watcher(&self) -> watch::Receiver<Option<ConnectionPing>> {
        self.current_ping.subscribe()
    }

    /// The aggregate current ping, or `None` before the first sample.
    ///
    /// Refreshed on samples only, so a value can outlive the connection it
    /// was measured on.
    pub fn current_ping(&self) -> Option<ConnectionPing> {
        *self.current_ping.borrow()
    }

    /// The number of live connection monitors.
    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .expect("mutex should be unpoisoned")
            .len()
    }

    /// Returns true when no connection is being monitored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dispatch(
        &self,
        identity: &str,
        epoch: i64,
        message: &[u8],
        now: DateTime<Utc>,
        direction: Direction,
    ) {
        let connection = ConnectionId::parse(identity);
        trace!(
            %connection,
            epoch,
            len = message.len(),
            ?direction,
            "observed message",
        );
        match direction {
            Direction::Sent => {
                metrics::counter!("okapi.net.out.bytes.total").increment(message.len() as u64)
            }
            Direction::Received => {
                metrics::counter!("okapi.net.in.bytes.total").increment(message.len() as u64)
            }
        }

        let mut connections = self
            .connections
            .lock()
            .expect("mutex should be unpoisoned");
        let monitor = connections
            .entry(connection)
            .or_insert_with(|| PerConnectionMonitor::new(&self.config, now));

        let result = match direction {
            Direction::Sent => monitor.message_sent(message, now),
            Direction::Received => monitor.message_received(message, now),
        };
        let update = match result {
            Ok(update) => update,
            // A chunk the dissector cannot read is dropped; the connection
            // itself stays monitored.
            Err(error) => {
                debug!(%connection, %error, "skipping undissectable message");
                MonitorUpdate::default()
            }
        };

        if let Some(op_code) = update.discovered {
            info!(%connection, ?op_code, "detected ping opcode pair");
            metrics::counter!("okapi.ping.opcode.detections.total").increment(1);
            // Send errors just mean nobody is subscribed.
            let _ = self.events.send(PingEvent::OpcodeDetected {
                connection,
                op_code,
            });
        }

        // The idle sweep is the only path that destroys monitors.
        self.sweep_idle(&mut connections, now);
        metrics::gauge!("okapi.net.connections").set(connections.len() as f64);

        if let Some(sample) = update.sample {
            let connection_ping = ConnectionPing {
                connection,
                ping_ms: sample.ping_ms,
                sample_time: sample.sampled_at,
            };
            debug!(%connection, ping_ms = sample.ping_ms, "ping sample");
            metrics::histogram!("okapi.ping.latency.ms").record(sample.ping_ms);
            let _ = self.events.send(PingEvent::ConnectionSample(connection_ping));

            let global = Self::global_current(&connections);
            self.current_ping.send_replace(global);
            if let Some(global) = global {
                metrics::gauge!("okapi.ping.current.ms").set(global.ping_ms);
                let _ = self.events.send(PingEvent::CurrentPing(global));
            }
        }
    }

    /// The worst current ping across live connections.
    fn global_current(
        connections: &HashMap<ConnectionId, PerConnectionMonitor>,
    ) -> Option<ConnectionPing> {
        connections
            .iter()
            .filter_map(|(connection, monitor)| {
                let sample = monitor.current_ping()?;
                Some(ConnectionPing {
                    connection: *connection,
                    ping_ms: sample.ping_ms,
                    sample_time: sample.sampled_at,
                })
            })
            .max_by(|a, b| a.ping_ms.total_cmp(&b.ping_ms))
    }

    fn sweep_idle(
        &self,
        connections: &mut HashMap<ConnectionId, PerConnectionMonitor>,
        now: DateTime<Utc>,
    ) {
        let timeout = self.config.idle_connection_timeout;
        connections.retain(|connection, monitor| {
            let idle = match now.signed_duration_since(monitor.last_activity()).to_std() {
                Ok(idle) => idle,
                // Replayed captures can deliver observation times out of
                // order; a future-dated monitor is not idle.
                Err(_) => return true,
            };
            if idle > timeout {
                debug!(%connection, ?idle, "dropping idle connection");
                false
            } else {
                true
            }
        });
    }
}
