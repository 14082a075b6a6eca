//! Per-connection traffic dissection and ping state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use okapi_protocol::{
    ipc::parse_ipc_header,
    segment::{parse_segment_header, ClientSegmentType, KeepAliveData, ServerSegmentType},
    serialization::{wire_deserialize_at, ParseError},
};

use crate::{
    config::Config,
    latency::{IpcPingHandler, KeepAliveHandler, PingOpcodeDetector, PingOpcodePair, PingSample},
};


/// What one observed message changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonitorUpdate {
    /// A ping sample this message completed, if any.
    pub sample: Option<PingSample>,
    /// An opcode pair this message's statistics revealed, if any.
    pub discovered: Option<PingOpcodePair>,
}

/// Dissects one connection's messages and tracks its ping.
///
/// Feed every captured message through [`message_sent`] or
/// [`message_received`] in observation order. Keep-alive echoes and IPC ping
/// exchanges both produce samples; the connection's current ping is the
/// minimum sample within the configured window, so a single delayed exchange
/// does not mask an otherwise healthy link.
///
/// [`message_sent`]: Self::message_sent
/// [`message_received`]: Self::message_received
#[derive(Clone, Debug)]
pub struct PerConnectionMonitor {
    keep_alive: KeepAliveHandler,
    ipc: IpcPingHandler,
    detector: PingOpcodeDetector,
    /// Recent samples, keyed by epoch milliseconds of observation.
    samples: BTreeMap<i64, f64>,
    current: Option<PingSample>,
    last_activity: DateTime<Utc>,
    sample_window_ms: i64,
}

impl PerConnectionMonitor {
    /// Returns a monitor for a connection first seen at `now`.
    pub fn new(config: &Config, now: DateTime<Utc>) -> Self {
        PerConnectionMonitor {
            keep_alive: KeepAliveHandler::default(),
            ipc: IpcPingHandler::new(config.ping_op_code),
            detector: PingOpcodeDetector::new(),
            samples: BTreeMap::new(),
            current: None,
            last_activity: now,
            sample_window_ms: config.ping_sample_window.as_millis() as i64,
        }
    }

    /// The windowed minimum ping, or `None` before the first sample.
    pub fn current_ping(&self) -> Option<PingSample> {
        self.current
    }

    /// When this connection last showed traffic.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// The opcode pair IPC pings are currently matched against.
    pub fn op_code(&self) -> Option<PingOpcodePair> {
        self.ipc.op_code()
    }

    /// Dissects one client-sent message observed at `now`.
    pub fn message_sent(
        &mut self,
        message: &[u8],
        now: DateTime<Utc>,
    ) -> Result<MonitorUpdate, ParseError> {
        // Undissectable traffic still proves the connection is alive.
        self.last_activity = now;

        let (consumed, header) = parse_segment_header(message, 0)?;
        let payload = &message[consumed..];
        let mut update = MonitorUpdate::default();

        match ClientSegmentType::from_code(header.segment_type) {
            Some(ClientSegmentType::KeepAlive) => {
                let (_, keep_alive): (usize, KeepAliveData) = wire_deserialize_at(payload, 0)?;
                self.keep_alive.client_sent(&keep_alive, now);
                let discovered = self.detector.keep_alive_sent(now);
                update.discovered = self.apply_discovery(discovered);
            }
            Some(ClientSegmentType::Ipc) => {
                let (consumed, ipc_header) = parse_ipc_header(payload, 0)?;
                let data = &payload[consumed..];
                self.detector.client_ipc_sent(&ipc_header, data, now);
                self.ipc.client_sent(&ipc_header, data, now)?;
            }
            // Other segment types are valid traffic this observer ignores.
            None => {}
        }

        Ok(update)
    }

    /// Dissects one server-sent message observed at `now`.
    pub fn message_received(
        &mut self,
        message: &[u8],
        now: DateTime<Utc>,
    ) -> Result<MonitorUpdate, ParseError> {
        self.last_activity = now;

        let (consumed, header) = parse_segment_header(message, 0)?;
        let payload = &message[consumed..];
        let mut update = MonitorUpdate::default();

        match ServerSegmentType::from_code(header.segment_type) {
            Some(ServerSegmentType::KeepAlive) => {
                let (_, keep_alive): (usize, KeepAliveData) = wire_deserialize_at(payload, 0)?;
                update.sample = self
                    .keep_alive
                    .client_received(&keep_alive, now)
                    .map(|sample| self.record_sample(sample));
                let discovered = self.detector.keep_alive_received(now);
                update.discovered = self.apply_discovery(discovered);
            }
            Some(ServerSegmentType::Ipc) => {
                let (consumed, ipc_header) = parse_ipc_header(payload, 0)?;
                let data = &payload[consumed..];

                // Sync a discovery into the matcher before it sees this
                // message: the response that reveals the pair is usually
                // also the first one worth matching.
                let discovered = self.detector.server_ipc_received(&ipc_header, data, now);
                update.discovered = self.apply_discovery(discovered);

                update.sample = self
                    .ipc
                    .client_received(&ipc_header, data, now)?
                    .map(|sample| self.record_sample(sample));
            }
            None => {}
        }

        Ok(update)
    }

    /// Admits a sample into the window and refreshes the current ping.
    fn record_sample(&mut self, sample: PingSample) -> PingSample {
        let at = sample.sampled_at.timestamp_millis();
        self.samples.insert(at, sample.ping_ms);
        self.samples = self.samples.split_off(&(at - self.sample_window_ms));

        let windowed_min = self
            .samples
            .values()
            .copied()
            .min_by(f64::total_cmp)
            .unwrap_or(sample.ping_ms);
        let current = PingSample {
            ping_ms: windowed_min,
            sampled_at: sample.sampled_at,
        };
        self.current = Some(current);

        current
    }

    fn apply_discovery(&mut self, discovered: Option<PingOpcodePair>) -> Option<PingOpcodePair> {
        let pair = discovered?;
        self.ipc.set_op_code(pair);
        Some(pair)
    }
}
