//! Tests for the connection registry.

use chrono::{DateTime, Utc};

use okapi_protocol::{
    ipc::{ClientPingData, IpcHeader, ServerPingData, TIMESTAMP_DELTA},
    segment::{KeepAliveData, SegmentHeader},
    serialization::{WireDeserialize, WireSerialize},
};

use crate::{config::Config, connection_id::ConnectionId, latency::PingOpcodePair};

use super::{ConnectionPing, ConnectionRegistry, PingEvent};

const PAIR: PingOpcodePair = PingOpcodePair {
    client: 0x012d,
    server: 0x0200,
};

const CLIENT_IPC: u16 = 3;
const SERVER_IPC: u16 = 3;
const CLIENT_KEEP_ALIVE: u16 = 7;
const SERVER_KEEP_ALIVE: u16 = 8;

fn at(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).expect("valid timestamp")
}

fn chunk(segment_type: u16, payload: &[u8]) -> Vec<u8> {
    let header = SegmentHeader {
        size: (SegmentHeader::WIRE_SIZE + payload.len()) as u32,
        source_actor_id: 0x1111,
        target_actor_id: 0x2222,
        segment_type,
        reserved: 0,
    };

    let mut bytes = header
        .wire_serialize_to_vec()
        .expect("serialization into a vec never fails");
    bytes.extend_from_slice(payload);
    bytes
}

fn keep_alive_chunk(segment_type: u16, id: u32) -> Vec<u8> {
    let payload = KeepAliveData { id, timestamp: 0 }
        .wire_serialize_to_vec()
        .expect("serialization into a vec never fails");
    chunk(segment_type, &payload)
}

fn ipc_chunk(segment_type: u16, op_code: u16, data: &[u8]) -> Vec<u8> {
    let header = IpcHeader {
        reserved1: 0x14,
        reserved2: 0,
        op_code,
        unknown2: 0,
        server_id: 69,
        timestamp: 1_700_000_000,
        unknown_c: 0,
    };

    let mut payload = header
        .wire_serialize_to_vec()
        .expect("serialization into a vec never fails");
    payload.extend_from_slice(data);
    chunk(segment_type, &payload)
}

fn ping_chunk(op_code: u16, timestamp: u32) -> Vec<u8> {
    let data = ClientPingData {
        timestamp,
        reserved: [0; 20],
    }
    .wire_serialize_to_vec()
    .expect("serialization into a vec never fails");
    ipc_chunk(CLIENT_IPC, op_code, &data)
}

fn pong_chunk(op_code: u16, index: u32) -> Vec<u8> {
    let data = ServerPingData {
        timestamp: u64::from(index) + TIMESTAMP_DELTA,
        reserved: [0; 24],
    }
    .wire_serialize_to_vec()
    .expect("serialization into a vec never fails");
    ipc_chunk(SERVER_IPC, op_code, &data)
}

#[test]
fn keep_alive_samples_flow_to_the_aggregate() {
    okapi_test::init();

    let registry = ConnectionRegistry::new(Config::default());
    let watcher = registry.current_ping_watcher();
    const CONN: &str = "10.0.0.2:54000=>203.0.113.7:54992";

    registry.message_sent_at(CONN, 17, &keep_alive_chunk(CLIENT_KEEP_ALIVE, 1), at(1_000));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.current_ping(), None);

    registry.message_received_at(CONN, 18, &keep_alive_chunk(SERVER_KEEP_ALIVE, 1), at(1_030));

    let current = registry.current_ping().expect("the echo produced a sample");
    assert_eq!(current.connection, ConnectionId::parse(CONN));
    assert_eq!(current.ping_ms, 30.0);
    assert_eq!(current.sample_time, at(1_030));
    assert_eq!(*watcher.borrow(), Some(current));
}

#[test]
fn idle_connections_are_swept() {
    okapi_test::init();

    let registry = ConnectionRegistry::new(Config::default());
    const QUIET: &str = "10.0.0.2:54000=>203.0.113.7:54992";
    const BUSY: &str = "10.0.0.2:54002=>203.0.113.9:54992";

    registry.message_sent_at(QUIET, 1, &keep_alive_chunk(CLIENT_KEEP_ALIVE, 1), at(-30));
    registry.message_received_at(QUIET, 2, &keep_alive_chunk(SERVER_KEEP_ALIVE, 1), at(0));

    registry.message_sent_at(BUSY, 3, &keep_alive_chunk(CLIENT_KEEP_ALIVE, 2), at(120_000));
    assert_eq!(registry.len(), 2, "exactly at the timeout is not yet idle");

    registry.message_sent_at(BUSY, 4, &keep_alive_chunk(CLIENT_KEEP_ALIVE, 3), at(121_000));
    assert_eq!(registry.len(), 1);

    // The aggregate refreshes only on samples, so the swept connection's
    // value lingers until the next exchange completes.
    let stale = registry.current_ping().expect("the early sample is still current");
    assert_eq!(stale.connection, ConnectionId::parse(QUIET));
    assert_eq!(stale.ping_ms, 30.0);

    registry.message_received_at(BUSY, 5, &keep_alive_chunk(SERVER_KEEP_ALIVE, 3), at(121_040));
    let current = registry.current_ping().expect("the busy connection sampled");
    assert_eq!(current.connection, ConnectionId::parse(BUSY));
    assert_eq!(current.ping_ms, 40.0);
}

#[test]
fn an_undissectable_chunk_does_not_break_its_connection() {
    okapi_test::init();

    let registry = ConnectionRegistry::new(Config::default());
    const CONN: &str = "10.0.0.2:54001=>203.0.113.7:54992";

    registry.message_received_at(CONN, 1, &[0u8; 10], at(0));
    assert_eq!(registry.len(), 1, "a failed parse still registers the connection");
    assert_eq!(registry.current_ping(), None);

    registry.message_sent_at(CONN, 2, &keep_alive_chunk(CLIENT_KEEP_ALIVE, 9), at(500));
    registry.message_received_at(CONN, 3, &keep_alive_chunk(SERVER_KEEP_ALIVE, 9), at(560));

    let current = registry.current_ping().expect("later chunks still dissect");
    assert_eq!(current.ping_ms, 60.0);
}

#[test]
fn unattributable_connections_share_one_monitor() {
    okapi_test::init();

    let registry = ConnectionRegistry::new(Config::default());

    registry.message_sent_at("port 54000", 1, &keep_alive_chunk(CLIENT_KEEP_ALIVE, 5), at(0));
    registry.message_received_at("pid 4242", 2, &keep_alive_chunk(SERVER_KEEP_ALIVE, 5), at(40));

    assert_eq!(registry.len(), 1);
    let current = registry.current_ping().expect("the echo crossed identities");
    assert_eq!(current.connection, ConnectionId::Unknown);
    assert_eq!(current.ping_ms, 40.0);
}

#[tokio::test]
async fn events_follow_discovery_then_sample_order() {
    okapi_test::init();

    let registry = ConnectionRegistry::new(Config::default());
    let mut events = registry.subscribe();
    const CONN: &str = "10.0.0.2:54003=>203.0.113.7:54992";
    let connection = ConnectionId::parse(CONN);

    registry.message_sent_at(CONN, 1, &keep_alive_chunk(CLIENT_KEEP_ALIVE, 1), at(0));
    registry.message_sent_at(CONN, 2, &ping_chunk(PAIR.client, 5_000), at(10));
    registry.message_received_at(CONN, 3, &pong_chunk(PAIR.server, 5_000), at(50));
    registry.message_received_at(CONN, 4, &keep_alive_chunk(SERVER_KEEP_ALIVE, 1), at(90));

    assert_eq!(
        events.try_recv().expect("detection publishes an event"),
        PingEvent::OpcodeDetected {
            connection,
            op_code: PAIR,
        },
    );

    let sample = ConnectionPing {
        connection,
        ping_ms: 90.0,
        sample_time: at(90),
    };
    assert_eq!(
        events.try_recv().expect("the sample publishes an event"),
        PingEvent::ConnectionSample(sample),
    );
    assert_eq!(
        events.try_recv().expect("the aggregate follows the sample"),
        PingEvent::CurrentPing(sample),
    );
    assert!(events.try_recv().is_err(), "no further events are pending");
}
