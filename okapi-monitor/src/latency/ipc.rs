//! IPC ping exchange timing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use okapi_protocol::{
    ipc::{ClientPingData, IpcHeader, ServerPingData, TIMESTAMP_DELTA},
    serialization::{wire_deserialize_at, ParseError},
};

use super::{millis_between, PingOpcodePair, PingSample};

/// Pairs client IPC pings with their server responses on one connection.
///
/// Inactive until an opcode pair is known, because without one a ping cannot
/// be told apart from any other IPC message. Unlike keep-alives, several
/// pings can be in flight at once when the server lags, so sends are kept in
/// an ordered map by ping index.
#[derive(Clone, Debug)]
pub struct IpcPingHandler {
    op_code: Option<PingOpcodePair>,
    outstanding: BTreeMap<u32, DateTime<Utc>>,
}

impl IpcPingHandler {
    /// Returns a handler that measures nothing until an opcode pair arrives.
    ///
    /// `op_code` is the configured starting pair, if any.
    pub fn new(op_code: Option<PingOpcodePair>) -> Self {
        IpcPingHandler {
            op_code,
            outstanding: BTreeMap::new(),
        }
    }

    /// The opcode pair currently in use.
    pub fn op_code(&self) -> Option<PingOpcodePair> {
        self.op_code
    }

    /// Switches to a newly detected opcode pair.
    ///
    /// Sends recorded under the old pair stay: their indices live in the
    /// same timestamp space, and the receive-side prune retires them.
    pub fn set_op_code(&mut self, op_code: PingOpcodePair) {
        self.op_code = Some(op_code);
    }

    /// Records a client IPC message, if it is a ping.
    ///
    /// Messages with other opcodes are ignored. A ping whose payload is too
    /// short to carry [`ClientPingData`] is a parse error.
    pub fn client_sent(
        &mut self,
        header: &IpcHeader,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), ParseError> {
        let Some(pair) = self.op_code else {
            return Ok(());
        };
        if header.op_code != pair.client {
            return Ok(());
        }

        let (_, ping): (usize, ClientPingData) = wire_deserialize_at(payload, 0)?;
        self.outstanding.insert(ping.timestamp, now);

        Ok(())
    }

    /// Records a server IPC message, returning a sample when it answers an
    /// outstanding ping.
    ///
    /// Whether or not the response matches a send, every recorded send older
    /// than the response's index is dropped: ping indices rise
    /// monotonically, so older unanswered sends are permanently stale.
    pub fn client_received(
        &mut self,
        header: &IpcHeader,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Option<PingSample>, ParseError> {
        let Some(pair) = self.op_code else {
            return Ok(None);
        };
        if header.op_code != pair.server {
            return Ok(None);
        }

        let (_, pong): (usize, ServerPingData) = wire_deserialize_at(payload, 0)?;
        let index = pong.timestamp.wrapping_sub(TIMESTAMP_DELTA) as u32;

        let sample = self.outstanding.remove(&index).map(|sent_at| PingSample {
            ping_ms: millis_between(sent_at, now),
            sampled_at: now,
        });
        self.outstanding.retain(|&sent_index, _| sent_index >= index);

        Ok(sample)
    }
}

#[cfg(test)]
mod tests {

    use okapi_protocol::serialization::WireDeserialize;

    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).expect("valid timestamp")
    }

    fn header(op_code: u16) -> IpcHeader {
        IpcHeader {
            reserved1: 0x14,
            reserved2: 0,
            op_code,
            unknown2: 0,
            server_id: 69,
            timestamp: 1_700_000_000,
            unknown_c: 0,
        }
    }

    fn ping_payload(timestamp: u32) -> Vec<u8> {
        let mut payload = vec![0; ClientPingData::WIRE_SIZE];
        payload[..4].copy_from_slice(&timestamp.to_le_bytes());
        payload
    }

    fn pong_payload(index: u32) -> Vec<u8> {
        let mut payload = vec![0; ServerPingData::WIRE_SIZE];
        let timestamp = u64::from(index) + TIMESTAMP_DELTA;
        payload[..8].copy_from_slice(&timestamp.to_le_bytes());
        payload
    }

    const PAIR: PingOpcodePair = PingOpcodePair {
        client: 0x012d,
        server: 0x0200,
    };

    #[test]
    fn response_matches_its_send_by_index() {
        okapi_test::init();

        let mut handler = IpcPingHandler::new(Some(PAIR));

        handler
            .client_sent(&header(PAIR.client), &ping_payload(1_000), at(0))
            .expect("well-formed ping");
        let sample = handler
            .client_received(&header(PAIR.server), &pong_payload(1_000), at(42))
            .expect("well-formed response")
            .expect("matching response should sample");

        assert_eq!(sample.ping_ms, 42.0);

        // The answered send is gone; a duplicate response is unmatched.
        let resampled = handler
            .client_received(&header(PAIR.server), &pong_payload(1_000), at(60))
            .expect("well-formed response");
        assert_eq!(resampled, None);
    }

    #[test]
    fn responses_prune_older_sends() {
        okapi_test::init();

        let mut handler = IpcPingHandler::new(Some(PAIR));

        for (index, sent_at) in [(1_000, 0), (1_001, 1_000), (1_002, 2_000)] {
            handler
                .client_sent(&header(PAIR.client), &ping_payload(index), at(sent_at))
                .expect("well-formed ping");
        }

        // Answering the middle index drops the older one as stale.
        handler
            .client_received(&header(PAIR.server), &pong_payload(1_001), at(2_050))
            .expect("well-formed response")
            .expect("matching response should sample");
        assert_eq!(
            handler
                .client_received(&header(PAIR.server), &pong_payload(1_000), at(2_060))
                .expect("well-formed response"),
            None,
        );

        // The newer send is still answerable.
        assert!(handler
            .client_received(&header(PAIR.server), &pong_payload(1_002), at(2_070))
            .expect("well-formed response")
            .is_some());
    }

    #[test]
    fn other_opcodes_are_ignored() {
        okapi_test::init();

        let mut handler = IpcPingHandler::new(Some(PAIR));

        // Not a ping: arbitrary short payloads are fine on other opcodes.
        handler
            .client_sent(&header(0x00aa), &[1, 2, 3], at(0))
            .expect("non-ping opcodes are not parsed");
        assert_eq!(
            handler
                .client_received(&header(0x00bb), &[4, 5], at(10))
                .expect("non-ping opcodes are not parsed"),
            None,
        );
    }

    #[test]
    fn undiscovered_pair_measures_nothing() {
        okapi_test::init();

        let mut handler = IpcPingHandler::new(None);

        handler
            .client_sent(&header(PAIR.client), &ping_payload(1_000), at(0))
            .expect("inactive handler ignores traffic");
        assert_eq!(
            handler
                .client_received(&header(PAIR.server), &pong_payload(1_000), at(42))
                .expect("inactive handler ignores traffic"),
            None,
        );
    }

    #[test]
    fn short_ping_payload_is_a_parse_error() {
        okapi_test::init();

        let mut handler = IpcPingHandler::new(Some(PAIR));

        let result = handler.client_sent(&header(PAIR.client), &[0; 10], at(0));
        assert_eq!(result, Err(ParseError::Incomplete));

        let result = handler.client_received(&header(PAIR.server), &[0; 10], at(0));
        assert_eq!(result, Err(ParseError::Incomplete));
    }

    #[test]
    fn detected_pair_replaces_the_configured_one() {
        okapi_test::init();

        let mut handler = IpcPingHandler::new(Some(PAIR));
        let detected = PingOpcodePair {
            client: 0x019b,
            server: 0x02f4,
        };

        handler.set_op_code(detected);
        assert_eq!(handler.op_code(), Some(detected));

        // Pings on the old pair's opcodes are no longer recognized.
        handler
            .client_sent(&header(PAIR.client), &ping_payload(1_000), at(0))
            .expect("non-ping opcodes are not parsed");
        assert_eq!(
            handler
                .client_received(&header(PAIR.server), &pong_payload(1_000), at(42))
                .expect("non-ping opcodes are not parsed"),
            None,
        );

        // The new pair measures.
        handler
            .client_sent(&header(detected.client), &ping_payload(2_000), at(100))
            .expect("well-formed ping");
        assert!(handler
            .client_received(&header(detected.server), &pong_payload(2_000), at(130))
            .expect("well-formed response")
            .is_some());
    }
}
