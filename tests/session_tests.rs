//! Session tests against an in-process WebSocket server
//!
//! The server speaks the chunked protocol with a scripted record source:
//! - Query execution and record consumption
//! - Catalog and cancel requests
//! - Result cancellation
//! - Connection failures and closed handles

mod common;

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use common::*;
use futures::{SinkExt, StreamExt};
use graphwire::driver::observers::SummaryWaiter;
use graphwire::driver::StreamState;
use graphwire::protocol::{ChunkDecoder, Parameters, RequestType, Value};
use graphwire::{Driver, DriverError};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Scripted server side of one connection.
///
/// Replies follow request order, so each RUN queues a counter that the
/// PULLs of that query advance and its final PULL (or DISCARD) retires.
struct FakeGraph {
    total: Option<i64>,
    queries: VecDeque<i64>,
}

impl FakeGraph {
    fn new(total: Option<i64>) -> Self {
        Self {
            total,
            queries: VecDeque::new(),
        }
    }

    fn handle(&mut self, message: &[u8]) -> Vec<Bytes> {
        match RequestType::try_from(message[0]).unwrap() {
            RequestType::Run => {
                self.queries.push_back(0);
                vec![query_data(1, "tok-1"), variables(&["n"]), success(vec![])]
            }
            RequestType::Pull => {
                let count = u32::from_be_bytes([message[2], message[3], message[4], message[5]]);
                let total = self.total;
                let sent = self.queries.front_mut().unwrap();
                let mut replies = Vec::new();
                for _ in 0..count {
                    if total.is_some_and(|total| *sent >= total) {
                        break;
                    }
                    replies.push(record(vec![Value::Int64(*sent)]));
                    *sent += 1;
                }
                let has_next = total.map_or(true, |total| *sent < total);
                if !has_next {
                    self.queries.pop_front();
                }
                replies.push(pull_success(has_next));
                replies
            }
            RequestType::Discard => {
                self.queries.pop_front();
                vec![success(vec![])]
            }
            RequestType::Catalog => vec![success(vec![(
                "graphs",
                Value::List(vec![Value::from("social")]),
            )])],
            RequestType::Cancel => vec![success(vec![])],
        }
    }
}

type Seen = Arc<Mutex<Vec<RequestType>>>;

/// Serve every connection with `total` records per query (`None` never ends).
async fn serve(total: Option<i64>) -> (String, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let seen: Seen = Arc::default();

    let log = seen.clone();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let log = log.clone();
            tokio::spawn(async move {
                let mut ws = accept_async(tcp).await.unwrap();
                let mut decoder = ChunkDecoder::new();
                let mut graph = FakeGraph::new(total);
                while let Some(Ok(message)) = ws.next().await {
                    let data = match message {
                        Message::Binary(data) => data,
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    for request in decoder.decode(data).unwrap() {
                        log.lock().push(RequestType::try_from(request[0]).unwrap());
                        for reply in graph.handle(&request) {
                            if ws.send(Message::Binary(reply)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    (url, seen)
}

#[tokio::test]
async fn test_query_records_arrive_in_batches() {
    let (url, seen) = serve(Some(5)).await;
    let driver = Driver::builder(&url).fetch_size(2).build().unwrap();
    let session = driver.session().unwrap();

    let result = session.run("MATCH (n) RETURN n", Parameters::new()).unwrap();
    let records = result.records().await.unwrap();
    let values: Vec<i64> = records
        .iter()
        .map(|r| r.get("n").and_then(Value::as_i64).unwrap())
        .collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);

    assert_eq!(result.variables().await.unwrap(), vec!["n"]);
    let summary = result.summary().await.unwrap();
    assert_eq!(summary.get("hasNext"), Some(&Value::Bool(false)));
    assert_eq!(result.preamble().unwrap().cancellation_token, "tok-1");

    session.close().await;
    let seen = seen.lock().clone();
    assert_eq!(seen.iter().filter(|k| **k == RequestType::Pull).count(), 3);
    assert_eq!(seen[0], RequestType::Run);

    driver.close().await;
}

#[tokio::test]
async fn test_record_stream_yields_each_record() {
    let (url, _seen) = serve(Some(3)).await;
    let driver = Driver::new(&url).unwrap();
    let session = driver.session().unwrap();

    let result = session.run("MATCH (n) RETURN n", Parameters::new()).unwrap();
    let records: Vec<_> = result.record_stream().collect().await;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.is_ok()));

    driver.close().await;
    assert!(!session.is_open());
}

#[tokio::test]
async fn test_requests_before_handshake_are_buffered() {
    let (url, _seen) = serve(Some(1)).await;
    let driver = Driver::new(&url).unwrap();
    let session = driver.session().unwrap();

    // Both issued before the socket can possibly be open.
    let first = session.run("RETURN 1", Parameters::new()).unwrap();
    let second = session.run("RETURN 2", Parameters::new()).unwrap();
    assert_eq!(first.records().await.unwrap().len(), 1);
    assert_eq!(second.records().await.unwrap().len(), 1);

    driver.close().await;
}

#[tokio::test]
async fn test_catalog_and_cancel() {
    let (url, seen) = serve(Some(2)).await;
    let driver = Driver::new(&url).unwrap();

    let catalog = driver.catalog().await.unwrap();
    assert_eq!(
        catalog.get("graphs"),
        Some(&Value::List(vec![Value::from("social")]))
    );

    let session = driver.session().unwrap();
    let result = session.run("MATCH (n) RETURN n", Parameters::new()).unwrap();
    result.summary().await.unwrap();
    driver.cancel(&result).await.unwrap();
    assert!(seen.lock().contains(&RequestType::Cancel));

    driver.close().await;
}

#[tokio::test]
async fn test_cancel_discards_the_rest() {
    let (url, seen) = serve(None).await;
    let driver = Driver::builder(&url).fetch_size(1).build().unwrap();
    let session = driver.session().unwrap();

    let result = session.run("MATCH (n) RETURN n", Parameters::new()).unwrap();
    let (waiter, rx) = SummaryWaiter::new();
    result.subscribe(waiter);
    result.cancel().unwrap();
    assert!(result.is_cancelled());
    assert!(rx.await.is_err());
    assert_eq!(result.records().await.unwrap_err(), DriverError::Cancelled);

    // Observers attached after the cancel hear the discard acknowledgement.
    let summary = result.summary().await.unwrap();
    assert_eq!(summary, map(vec![]));
    assert_eq!(result.state(), StreamState::Finished);

    let seen = seen.lock().clone();
    assert!(seen.contains(&RequestType::Discard));
    assert!(!seen.contains(&RequestType::Pull));
    driver.close().await;
}

#[tokio::test]
async fn test_records_can_be_read_again() {
    let (url, _seen) = serve(Some(2)).await;
    let driver = Driver::new(&url).unwrap();
    let session = driver.session().unwrap();

    let result = session.run("MATCH (n) RETURN n", Parameters::new()).unwrap();
    assert_eq!(result.records().await.unwrap().len(), 2);
    assert_eq!(result.records().await.unwrap().len(), 2);

    let replayed: Vec<_> = result.record_stream().collect().await;
    assert_eq!(replayed.len(), 2);
    assert!(replayed.iter().all(|r| r.is_ok()));

    driver.close().await;
}

#[tokio::test]
async fn test_streamed_records_are_not_collected_twice() {
    let (url, _seen) = serve(Some(2)).await;
    let driver = Driver::new(&url).unwrap();
    let session = driver.session().unwrap();

    let result = session.run("MATCH (n) RETURN n", Parameters::new()).unwrap();
    let streamed: Vec<_> = result.record_stream().collect().await;
    assert_eq!(streamed.len(), 2);

    assert_eq!(
        result.records().await.unwrap_err(),
        DriverError::ResultConsumed
    );
    let again: Vec<_> = result.record_stream().collect().await;
    assert_eq!(again, vec![Err(DriverError::ResultConsumed)]);

    driver.close().await;
}

#[tokio::test]
async fn test_unsubscribe_releases_waiters() {
    let (url, _seen) = serve(None).await;
    let driver = Driver::builder(&url).fetch_size(1).build().unwrap();
    let session = driver.session().unwrap();
    let result = session.run("MATCH (n) RETURN n", Parameters::new()).unwrap();

    let waiting = result.clone();
    let summary = tokio::spawn(async move { waiting.summary().await });
    tokio::task::yield_now().await;

    result.unsubscribe();
    assert_eq!(summary.await.unwrap(), Err(DriverError::Unsubscribed));

    result.cancel().unwrap();
    driver.close().await;
}

#[tokio::test]
async fn test_cancel_on_closed_session_is_refused() {
    let (url, _seen) = serve(None).await;
    let driver = Driver::new(&url).unwrap();
    let session = driver.session().unwrap();
    let result = session.run("MATCH (n) RETURN n", Parameters::new()).unwrap();

    session.close().await;
    assert_eq!(result.cancel(), Err(DriverError::SessionClosed));
    assert!(!result.is_cancelled());

    driver.close().await;
}

#[tokio::test]
async fn test_text_frame_is_a_framing_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        if let Some(Ok(_)) = ws.next().await {
            let _ = ws.send(Message::text("not chunked")).await;
        }
        // Hold the socket open until the client goes away.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let driver = Driver::new(&url).unwrap();
    let session = driver.session().unwrap();
    let result = session.run("RETURN 1", Parameters::new()).unwrap();

    let err = result.summary().await.unwrap_err();
    assert!(matches!(err, DriverError::Framing(_)), "{:?}", err);
    assert!(err.is_fatal());

    driver.close().await;
}

#[tokio::test]
async fn test_unreachable_server_fails_results() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let driver = Driver::new(&url).unwrap();
    let session = driver.session().unwrap();
    let result = session.run("RETURN 1", Parameters::new()).unwrap();

    let err = result.summary().await.unwrap_err();
    assert!(
        matches!(err, DriverError::Connection(ref m) if m.contains("Is the server running")),
        "{:?}",
        err
    );
    assert_eq!(
        session.cancel(&result).await.unwrap_err(),
        DriverError::QueryNotStarted
    );
    driver.close().await;
}

#[tokio::test]
async fn test_closed_handles_reject_work() {
    let (url, _seen) = serve(Some(0)).await;
    let driver = Driver::new(&url).unwrap();
    let session = driver.session().unwrap();
    session.close().await;

    assert_eq!(
        session.run("RETURN 1", Parameters::new()).err(),
        Some(DriverError::SessionClosed)
    );
    assert_eq!(session.catalog().await.unwrap_err(), DriverError::SessionClosed);

    driver.close().await;
    assert_eq!(driver.session().err(), Some(DriverError::DriverClosed));
}
