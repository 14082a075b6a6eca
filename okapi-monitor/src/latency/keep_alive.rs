//! Keep-alive echo timing.

use chrono::{DateTime, Utc};

use okapi_protocol::segment::KeepAliveData;

use super::{millis_between, PingSample};

/// Times keep-alive exchanges on one connection.
///
/// The client sends a keep-alive with a fresh id and the server echoes the
/// id back. Keep-alives are strictly request-then-response, so the latest
/// send is the only one an echo can answer and a single slot of state is
/// enough.
#[derive(Clone, Debug, Default)]
pub struct KeepAliveHandler {
    outstanding: Option<(u32, DateTime<Utc>)>,
}

impl KeepAliveHandler {
    /// Records a client keep-alive send.
    pub fn client_sent(&mut self, keep_alive: &KeepAliveData, now: DateTime<Utc>) {
        self.outstanding = Some((keep_alive.id, now));
    }

    /// Records a server keep-alive echo, returning a sample when it answers
    /// the latest recorded send.
    ///
    /// An echo with no recorded send, or whose id does not match it, is
    /// ignored.
    pub fn client_received(
        &mut self,
        keep_alive: &KeepAliveData,
        now: DateTime<Utc>,
    ) -> Option<PingSample> {
        let (sent_id, sent_at) = self.outstanding?;
        if keep_alive.id != sent_id {
            return None;
        }

        Some(PingSample {
            ping_ms: millis_between(sent_at, now),
            sampled_at: now,
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).expect("valid timestamp")
    }

    fn keep_alive(id: u32) -> KeepAliveData {
        KeepAliveData {
            id,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn echo_of_the_latest_send_is_a_sample() {
        okapi_test::init();

        let mut handler = KeepAliveHandler::default();

        handler.client_sent(&keep_alive(7), at(1_000));
        let sample = handler
            .client_received(&keep_alive(7), at(1_030))
            .expect("matching echo should sample");

        assert_eq!(sample.ping_ms, 30.0);
        assert_eq!(sample.sampled_at, at(1_030));
    }

    #[test]
    fn mismatched_echo_is_ignored() {
        okapi_test::init();

        let mut handler = KeepAliveHandler::default();

        handler.client_sent(&keep_alive(7), at(1_000));
        assert_eq!(handler.client_received(&keep_alive(8), at(1_030)), None);

        // The mismatch does not disturb the recorded send.
        assert!(handler.client_received(&keep_alive(7), at(1_040)).is_some());
    }

    #[test]
    fn echo_without_a_send_is_ignored() {
        okapi_test::init();

        let mut handler = KeepAliveHandler::default();

        assert_eq!(handler.client_received(&keep_alive(0), at(1_030)), None);
    }

    #[test]
    fn duplicated_echo_samples_again() {
        okapi_test::init();

        let mut handler = KeepAliveHandler::default();

        handler.client_sent(&keep_alive(7), at(1_000));
        handler.client_received(&keep_alive(7), at(1_030));

        // Retransmitted echoes measure against the same send.
        let sample = handler
            .client_received(&keep_alive(7), at(1_050))
            .expect("duplicate echo should sample");
        assert_eq!(sample.ping_ms, 50.0);
    }
}
