//! Query stream lifecycle tests
//!
//! Drives a `Connection` over an in-memory transport, playing the server by
//! hand:
//! - FIFO correlation of interleaved queries
//! - Pull-based flow control
//! - Replay for late subscribers
//! - Cancellation and absorption of trailing replies
//! - Connection error policies and fatal decode errors

mod common;

use common::*;
use graphwire::driver::observers::{RecordCollector, ReplyObserver, SummaryWaiter, VariablesWaiter};
use graphwire::driver::{
    Connection, ConnectionErrorPolicy, Outcome, QueryStream, RecordDelivery, SessionConfig,
    SharedStream, StreamState,
};
use graphwire::error::DriverError;
use graphwire::protocol::{Parameters, RequestType, Value};
use tokio::sync::oneshot::error::TryRecvError;

use RequestType::{Catalog, Discard, Pull, Run};

fn connection(fetch_size: u32, policy: ConnectionErrorPolicy) -> (Connection<Wire>, Wire) {
    let wire = Wire::new();
    let config = SessionConfig {
        fetch_size,
        connection_error_policy: policy,
        ..Default::default()
    };
    (Connection::new(wire.clone(), &config), wire)
}

fn start(conn: &mut Connection<Wire>, fetch_size: u32, delivery: RecordDelivery) -> SharedStream {
    let stream = QueryStream::new(fetch_size, delivery).shared();
    conn.run(
        "MATCH (n) RETURN n".to_string(),
        Parameters::new(),
        stream.clone(),
    );
    stream
}

fn ints(records: &[graphwire::Record]) -> Vec<i64> {
    records
        .iter()
        .map(|r| r.get(0).and_then(Value::as_i64).unwrap())
        .collect()
}

#[test]
fn test_fetch_size_drives_pull_count() {
    let (mut conn, wire) = connection(2, ConnectionErrorPolicy::NotifyCurrent);
    let stream = start(&mut conn, 2, RecordDelivery::WhenWanted);
    let (collector, mut rx) = RecordCollector::new();
    stream.lock().subscribe(Box::new(collector));
    assert_eq!(wire.kinds(), vec![Run]);

    conn.receive(query_data(3, "tok-1")).unwrap();
    conn.receive(variables(&["n"])).unwrap();
    assert_eq!(wire.kinds(), vec![Run, Pull]);
    conn.receive(success(vec![])).unwrap();

    for batch in [vec![0, 1], vec![2, 3]] {
        for i in batch {
            conn.receive(record(vec![Value::Int64(i)])).unwrap();
        }
        conn.receive(pull_success(true)).unwrap();
    }
    conn.receive(record(vec![Value::Int64(4)])).unwrap();
    conn.receive(pull_success(false)).unwrap();

    assert_eq!(wire.pull_counts(), vec![2, 2, 2]);
    let records = rx.try_recv().unwrap().unwrap();
    assert_eq!(ints(&records), vec![0, 1, 2, 3, 4]);

    let stream = stream.lock();
    assert_eq!(stream.pulls_issued(), 3);
    assert_eq!(stream.state(), StreamState::Finished);
    let preamble = stream.preamble().unwrap();
    assert_eq!(preamble.worker_index, 3);
    assert_eq!(preamble.cancellation_token, "tok-1");
    assert_eq!(conn.in_flight(), 0);
}

#[test]
fn test_replies_are_matched_in_request_order() {
    let (mut conn, wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let first = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let second = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let (catalog, mut catalog_rx) = ReplyObserver::new("catalog");
    conn.catalog(Box::new(catalog));

    let (c1, mut rx1) = RecordCollector::new();
    first.lock().subscribe(Box::new(c1));
    let (c2, mut rx2) = RecordCollector::new();
    second.lock().subscribe(Box::new(c2));

    conn.receive(variables(&["x"])).unwrap();
    conn.receive(success(vec![])).unwrap();
    conn.receive(variables(&["y"])).unwrap();
    conn.receive(success(vec![])).unwrap();
    assert_eq!(wire.kinds(), vec![Run, Run, Catalog, Pull, Pull]);

    conn.receive(success(vec![("graphs", Value::List(vec![Value::from("g")]))]))
        .unwrap();
    let catalog = catalog_rx.try_recv().unwrap().unwrap();
    assert_eq!(catalog.get("graphs").and_then(Value::as_list).map(|l| l.len()), Some(1));

    conn.receive(record(vec![Value::Int64(1)])).unwrap();
    conn.receive(pull_success(false)).unwrap();
    conn.receive(record(vec![Value::Int64(2)])).unwrap();
    conn.receive(record(vec![Value::Int64(3)])).unwrap();
    conn.receive(pull_success(false)).unwrap();

    let r1 = rx1.try_recv().unwrap().unwrap();
    let r2 = rx2.try_recv().unwrap().unwrap();
    assert_eq!(ints(&r1), vec![1]);
    assert_eq!(r1[0].keys(), &["x".to_string()]);
    assert_eq!(ints(&r2), vec![2, 3]);
    assert_eq!(r2[0].keys(), &["y".to_string()]);
}

#[test]
fn test_late_subscriber_gets_a_replay() {
    let (mut conn, _wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let stream = start(&mut conn, 10, RecordDelivery::WhenWanted);

    conn.receive(variables(&["a", "b"])).unwrap();
    conn.receive(success(vec![])).unwrap();
    conn.receive(record(vec![Value::Int64(7), Value::from("seven")]))
        .unwrap();
    conn.receive(pull_success(false)).unwrap();
    assert_eq!(stream.lock().buffered(), 1);

    let (vars, mut vars_rx) = VariablesWaiter::new();
    let (collector, mut rx) = RecordCollector::new();
    let (summary, mut summary_rx) = SummaryWaiter::new();
    {
        let mut stream = stream.lock();
        stream.subscribe(Box::new(vars));
        stream.subscribe(Box::new(collector));
        stream.subscribe(Box::new(summary));
        assert_eq!(stream.subscribers(), 0);
    }

    assert_eq!(vars_rx.try_recv().unwrap().unwrap(), vec!["a", "b"]);
    let records = rx.try_recv().unwrap().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("b"), Some(&Value::from("seven")));
    assert!(summary_rx.try_recv().unwrap().is_ok());
}

#[test]
fn test_records_without_a_taker_are_dropped_when_subscribed() {
    let (mut conn, _wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let stream = start(&mut conn, 10, RecordDelivery::WhenSubscribed);
    let (summary, _summary_rx) = SummaryWaiter::new();
    stream.lock().subscribe(Box::new(summary));

    conn.receive(variables(&["a"])).unwrap();
    conn.receive(success(vec![])).unwrap();
    conn.receive(record(vec![Value::Null])).unwrap();
    assert_eq!(stream.lock().buffered(), 0);
}

#[test]
fn test_run_summary_can_carry_variables() {
    let (mut conn, wire) = connection(5, ConnectionErrorPolicy::NotifyCurrent);
    let stream = start(&mut conn, 5, RecordDelivery::WhenWanted);

    conn.receive(success(vec![(
        "projectionVariables",
        Value::List(vec![Value::from("v")]),
    )]))
    .unwrap();
    assert_eq!(wire.kinds(), vec![Run, Pull]);
    assert_eq!(stream.lock().variables(), Some(&["v".to_string()][..]));
}

#[test]
fn test_cancel_absorbs_trailing_replies() {
    let (mut conn, wire) = connection(2, ConnectionErrorPolicy::NotifyCurrent);
    let stream = start(&mut conn, 2, RecordDelivery::WhenWanted);
    let (collector, mut rx) = RecordCollector::new();
    stream.lock().subscribe(Box::new(collector));

    conn.receive(variables(&["n"])).unwrap();
    conn.receive(success(vec![])).unwrap();
    conn.receive(record(vec![Value::Int64(0)])).unwrap();

    assert!(stream.lock().cancel());
    assert!(!stream.lock().cancel());
    conn.discard(stream.clone());
    assert_eq!(wire.kinds(), vec![Run, Pull, Discard]);
    // The subscriber was released without an event.
    assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));

    conn.receive(record(vec![Value::Int64(1)])).unwrap();
    conn.receive(pull_success(true)).unwrap();
    assert_eq!(wire.count(Pull), 1);
    assert!(!stream.lock().is_finished());

    conn.receive(success(vec![])).unwrap();
    let stream = stream.lock();
    assert!(stream.is_finished());
    assert!(stream.is_cancelled());
    assert!(matches!(stream.outcome(), Some(Outcome::Success(_))));
    assert_eq!(stream.buffered(), 0);
}

#[test]
fn test_cancel_after_finish_is_a_noop() {
    let (mut conn, wire) = connection(2, ConnectionErrorPolicy::NotifyCurrent);
    let stream = start(&mut conn, 2, RecordDelivery::WhenWanted);
    conn.receive(variables(&["n"])).unwrap();
    conn.receive(success(vec![])).unwrap();
    conn.receive(pull_success(false)).unwrap();

    assert!(!stream.lock().cancel());
    assert!(!stream.lock().is_cancelled());
    assert_eq!(wire.count(Discard), 0);
}

#[test]
fn test_server_error_is_scoped_to_its_query() {
    let (mut conn, _wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let failing = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let healthy = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let (w1, mut rx1) = SummaryWaiter::new();
    failing.lock().subscribe(Box::new(w1));
    let (w2, mut rx2) = SummaryWaiter::new();
    healthy.lock().subscribe(Box::new(w2));

    conn.receive(error("syntax error near RETURN")).unwrap();
    assert_eq!(
        rx1.try_recv().unwrap(),
        Err(DriverError::Server("syntax error near RETURN".to_string()))
    );
    assert!(!conn.is_failed());

    conn.receive(variables(&["n"])).unwrap();
    conn.receive(success(vec![])).unwrap();
    conn.receive(pull_success(false)).unwrap();
    assert!(rx2.try_recv().unwrap().is_ok());
}

#[test]
fn test_connection_error_notifies_current_only() {
    let (mut conn, wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let first = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let second = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let (w1, mut rx1) = SummaryWaiter::new();
    first.lock().subscribe(Box::new(w1));
    let (w2, mut rx2) = SummaryWaiter::new();
    second.lock().subscribe(Box::new(w2));

    conn.fail(DriverError::ConnectionClosed);
    assert_eq!(rx1.try_recv().unwrap(), Err(DriverError::ConnectionClosed));
    assert_eq!(rx2.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(conn.in_flight(), 0);

    // Abandoning the stream releases the waiter that was never told.
    second.lock().abandon();
    assert_eq!(rx2.try_recv(), Err(TryRecvError::Closed));

    // Later requests fail immediately and never reach the wire.
    let (catalog, mut catalog_rx) = ReplyObserver::new("catalog");
    conn.catalog(Box::new(catalog));
    assert_eq!(
        catalog_rx.try_recv().unwrap(),
        Err(DriverError::ConnectionClosed)
    );
    assert_eq!(wire.kinds(), vec![Run, Run]);
}

#[test]
fn test_connection_error_notifies_all_when_configured() {
    let (mut conn, _wire) = connection(10, ConnectionErrorPolicy::NotifyAll);
    let first = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let second = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let (w1, mut rx1) = SummaryWaiter::new();
    first.lock().subscribe(Box::new(w1));
    let (w2, mut rx2) = SummaryWaiter::new();
    second.lock().subscribe(Box::new(w2));

    conn.fail(DriverError::ConnectionClosed);
    assert_eq!(rx1.try_recv().unwrap(), Err(DriverError::ConnectionClosed));
    assert_eq!(rx2.try_recv().unwrap(), Err(DriverError::ConnectionClosed));
}

#[test]
fn test_decode_error_is_fatal() {
    let (mut conn, _wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let stream = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let (waiter, mut rx) = SummaryWaiter::new();
    stream.lock().subscribe(Box::new(waiter));

    let err = conn.receive(chunked(&[0x42])).unwrap_err();
    assert!(matches!(err, DriverError::Decode(_)));
    assert!(conn.is_failed());
    assert_eq!(rx.try_recv().unwrap(), Err(err.clone()));

    // The connection stays failed with the first error.
    assert_eq!(conn.receive(variables(&["n"])).unwrap_err(), err);
}

#[test]
fn test_record_before_variables_is_a_protocol_error() {
    let (mut conn, _wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let stream = start(&mut conn, 10, RecordDelivery::WhenWanted);

    let err = conn.receive(record(vec![Value::Null])).unwrap_err();
    assert!(matches!(err, DriverError::Protocol(_)));
    assert!(matches!(
        stream.lock().outcome(),
        Some(Outcome::Failure(DriverError::Protocol(_)))
    ));
}

#[test]
fn test_record_arity_mismatch_is_a_protocol_error() {
    let (mut conn, _wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let _stream = start(&mut conn, 10, RecordDelivery::WhenWanted);
    conn.receive(variables(&["a", "b"])).unwrap();
    conn.receive(success(vec![])).unwrap();

    let err = conn.receive(record(vec![Value::Null])).unwrap_err();
    assert!(matches!(err, DriverError::Protocol(_)));
}

#[test]
fn test_failing_summary_is_reported_to_its_own_query() {
    let (mut conn, _wire) = connection(10, ConnectionErrorPolicy::NotifyCurrent);
    let first = start(&mut conn, 10, RecordDelivery::WhenWanted);
    let second = start(&mut conn, 10, RecordDelivery::WhenWanted);

    // A run summary without variables of either kind.
    let err = conn.receive(success(vec![])).unwrap_err();
    assert!(matches!(err, DriverError::Protocol(_)));
    assert_eq!(
        first.lock().outcome(),
        Some(&Outcome::Failure(err.clone()))
    );
    assert_eq!(second.lock().outcome(), None);
}
