//! IPC ping opcode detection.
//!
//! The opcode pair carrying ping traffic is not published, and it is
//! reassigned between game patches, so it has to be recovered from the
//! traffic itself. The detector keeps a ring of recent ping-shaped IPC
//! messages and, anchored on the keep-alive cadence, scores every
//! send/receive opcode combination by how much its traffic behaves like a
//! request/response exchange.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use okapi_protocol::{
    ipc::{ClientPingData, IpcHeader, ServerPingData, TIMESTAMP_DELTA},
    serialization::WireDeserialize,
};

use crate::constants::{DETECTION_RING_CAPACITY, DETECTION_TIME_WINDOW};

use super::PingOpcodePair;


const RING_MASK: usize = DETECTION_RING_CAPACITY - 1;
const TIME_WINDOW_MS: i64 = DETECTION_TIME_WINDOW.as_millis() as i64;

/// One ping-shaped message admitted into the ring.
#[derive(Copy, Clone, Debug)]
struct PktHolder {
    /// When the message was observed, in epoch milliseconds.
    observed_at: i64,
    direction: Direction,
    op_code: u16,
    /// The raw payload timestamp: u32-valued for client sends, shifted u64
    /// for server sends.
    ping_timestamp: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    ClientSent,
    ServerSent,
}

/// Tallies of one opcode's appearances at one ping index.
#[derive(Copy, Clone, Debug, Default)]
struct DirectionTally {
    sends: u32,
    recvs: u32,
}

/// Discovers the IPC ping opcode pair from one connection's traffic.
///
/// Candidates are admitted by shape alone, so the ring holds plenty of
/// non-ping traffic. What separates the real pair is correlation: a genuine
/// ping and its response land on the same ping index, close to a keep-alive,
/// and each index is normally used exactly once per direction.
#[derive(Clone, Debug)]
pub struct PingOpcodeDetector {
    ring: Vec<PktHolder>,
    /// Total slots ever written. The ring position is `cursor & RING_MASK`.
    cursor: u64,
    last_keep_alive_at: Option<i64>,
    current: Option<PingOpcodePair>,
}

impl PingOpcodeDetector {
    /// Returns a detector with no traffic observed and no pair discovered.
    pub fn new() -> Self {
        PingOpcodeDetector {
            ring: Vec::with_capacity(DETECTION_RING_CAPACITY),
            cursor: 0,
            last_keep_alive_at: None,
            current: None,
        }
    }

    /// The most recently detected pair.
    pub fn current(&self) -> Option<PingOpcodePair> {
        self.current
    }

    /// Considers a client IPC message as a ping candidate.
    ///
    /// Only messages shaped like a client ping are recorded: a payload
    /// within twice [`ClientPingData::WIRE_SIZE`], every reserved byte zero,
    /// and a non-zero timestamp.
    pub fn client_ipc_sent(&mut self, header: &IpcHeader, payload: &[u8], now: DateTime<Utc>) {
        if payload.len() < ClientPingData::WIRE_SIZE || payload.len() > 2 * ClientPingData::WIRE_SIZE
        {
            return;
        }
        let Ok(ping) = ClientPingData::wire_deserialize(payload) else {
            return;
        };
        if ping.reserved.iter().any(|&byte| byte != 0) || ping.timestamp == 0 {
            return;
        }

        self.record(PktHolder {
            observed_at: now.timestamp_millis(),
            direction: Direction::ClientSent,
            op_code: header.op_code,
            ping_timestamp: u64::from(ping.timestamp),
        });
    }

    /// Considers a server IPC message as a ping-response candidate, then
    /// re-runs detection.
    ///
    /// Returns the detected pair when this message changed the answer.
    pub fn server_ipc_received(
        &mut self,
        header: &IpcHeader,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Option<PingOpcodePair> {
        if payload.len() < ServerPingData::WIRE_SIZE || payload.len() > 2 * ServerPingData::WIRE_SIZE
        {
            return None;
        }
        let Ok(pong) = ServerPingData::wire_deserialize(payload) else {
            return None;
        };
        if pong.reserved.iter().any(|&byte| byte != 0) || pong.timestamp <= TIMESTAMP_DELTA {
            return None;
        }

        self.record(PktHolder {
            observed_at: now.timestamp_millis(),
            direction: Direction::ServerSent,
            op_code: header.op_code,
            ping_timestamp: pong.timestamp,
        });

        self.detect()
    }

    /// Re-anchors the detection window on a keep-alive send and re-runs
    /// detection.
    pub fn keep_alive_sent(&mut self, now: DateTime<Utc>) -> Option<PingOpcodePair> {
        self.last_keep_alive_at = Some(now.timestamp_millis());
        self.detect()
    }

    /// Re-anchors the detection window on a keep-alive receive and re-runs
    /// detection.
    pub fn keep_alive_received(&mut self, now: DateTime<Utc>) -> Option<PingOpcodePair> {
        self.last_keep_alive_at = Some(now.timestamp_millis());
        self.detect()
    }

    fn record(&mut self, slot: PktHolder) {
        let index = (self.cursor as usize) & RING_MASK;
        if self.ring.len() < DETECTION_RING_CAPACITY {
            self.ring.push(slot);
        } else {
            self.ring[index] = slot;
        }
        self.cursor += 1;
    }

    /// Scores recent traffic and returns the best pair when it differs from
    /// the current answer.
    ///
    /// Without a keep-alive anchor there is no notion of "recent", and
    /// nothing is detected.
    fn detect(&mut self) -> Option<PingOpcodePair> {
        let anchor = self.last_keep_alive_at?;

        // Walk the ring newest-first, tallying sends and receives per opcode
        // grouped by ping index, until the slots fall too far from the
        // anchor.
        let mut index_tallies: HashMap<u64, HashMap<u16, DirectionTally>> = HashMap::new();
        let head = self.cursor - self.ring.len() as u64;
        for position in (head..self.cursor).rev() {
            let slot = &self.ring[(position as usize) & RING_MASK];
            if (slot.observed_at - anchor).abs() > TIME_WINDOW_MS {
                break;
            }

            // Normalizing to a shared index space is what lets a request
            // line up with its response.
            let index = match slot.direction {
                Direction::ClientSent => slot.ping_timestamp,
                Direction::ServerSent => slot.ping_timestamp - TIMESTAMP_DELTA,
            };

            let tally = index_tallies
                .entry(index)
                .or_default()
                .entry(slot.op_code)
                .or_default();
            match slot.direction {
                Direction::ClientSent => tally.sends += 1,
                Direction::ServerSent => tally.recvs += 1,
            }
        }

        // Every send/receive opcode combination sharing an index is a
        // candidate pair, scored per index and averaged.
        let mut pair_confidences: HashMap<PingOpcodePair, Vec<f64>> = HashMap::new();
        for tallies in index_tallies.values() {
            for (&send_op, send) in tallies {
                if send.sends == 0 {
                    continue;
                }
                for (&recv_op, recv) in tallies {
                    if recv.recvs == 0 {
                        continue;
                    }

                    let pair = PingOpcodePair {
                        client: send_op,
                        server: recv_op,
                    };
                    pair_confidences
                        .entry(pair)
                        .or_default()
                        .push(index_confidence(send.sends, recv.recvs));
                }
            }
        }

        let (best, _) = pair_confidences
            .into_iter()
            .map(|(pair, confidences)| {
                let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
                (pair, mean)
            })
            .filter(|&(_, confidence)| confidence > 0.0)
            .max_by(|(_, first), (_, second)| first.total_cmp(second))?;

        if self.current == Some(best) {
            return None;
        }
        self.current = Some(best);
        Some(best)
    }
}

impl Default for PingOpcodeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// How strongly one index's tallies look like a single ping exchange.
///
/// `bias` compares the send and receive counts: 1.0 when they match,
/// falling toward 0.0 the more lopsided they are. The occurrence factor
/// decays the score as the total count grows past the ideal of exactly one
/// send and one receive, which scores 4.0.
fn index_confidence(sends: u32, recvs: u32) -> f64 {
    let sends = f64::from(sends);
    let recvs = f64::from(recvs);

    let bias = 2.0 * sends * recvs / (sends * sends + recvs * recvs);
    let occurrence_decay = 1.0 / (sends + recvs - 1.5);
    occurrence_decay * occurrence_decay * bias
}
