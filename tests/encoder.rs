mod common;

use std::time::Duration;

use common::*;
use futures::stream;
use serde_json::json;
use sse_event_bus::sse::SSE_HEADERS;
use sse_event_bus::{BusErrorKind, ChannelKey, DriveExit, Event, EventBusError, SseEncoder};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

fn room() -> ChannelKey {
    ChannelKey::new("room1").unwrap()
}

#[tokio::test]
async fn headers_are_flushed_before_any_event() {
    let encoder = SseEncoder::new(None);
    let mut sink = RecordingSink::new();
    let mut events = stream::iter(vec![Event::opened(&room())]);

    let exit = encoder
        .drive(&CancellationToken::new(), &mut sink, &mut events)
        .await
        .unwrap();

    assert_eq!(exit, DriveExit::UpstreamClosed);
    let recorded = sink.recorded.lock().unwrap();
    assert_eq!(recorded.headers, SSE_HEADERS.to_vec());
    assert_eq!(recorded.flushed_at.first(), Some(&0));
}

#[tokio::test]
async fn frames_match_wire_format() {
    let encoder = SseEncoder::new(None);
    let mut sink = RecordingSink::new();
    let mut events = stream::iter(vec![
        Event::opened(&room()),
        Event::new(&room(), json!({"temp": 42})),
        Event::new(&room(), json!([])),
    ]);

    encoder
        .drive(&CancellationToken::new(), &mut sink, &mut events)
        .await
        .unwrap();

    assert_eq!(
        sink.text(),
        "data: {\"id\":\"room1\",\"payload\":null}\n\n\
         data: {\"id\":\"room1\",\"temp\":42}\n\n\
         data: []\n\n"
    );
    // One flush for the headers plus one per frame.
    assert_eq!(sink.flushes(), 4);
}

#[tokio::test]
async fn write_failure_stops_without_retry() {
    let errors = ErrorRecorder::default();
    let encoder = SseEncoder::new(None).with_error_callback(errors.callback());
    let mut sink = RecordingSink::new().fail_after(1);
    let mut events = stream::iter(vec![
        Event::opened(&room()),
        Event::new(&room(), json!({"n": 1})),
        Event::new(&room(), json!({"n": 2})),
    ]);

    let err = encoder
        .drive(&CancellationToken::new(), &mut sink, &mut events)
        .await
        .unwrap_err();

    assert!(matches!(err, EventBusError::Write(_)));
    assert_eq!(sink.frames(), vec![r#"{"id":"room1","payload":null}"#.to_string()]);
    let reported = errors.errors();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].kind, BusErrorKind::WriteFailure);
    assert_eq!(reported[0].topic, "room1");
}

#[tokio::test]
async fn cancellation_returns_cleanly() {
    let encoder = SseEncoder::new(None);
    let mut sink = RecordingSink::new();
    let (tx, rx) = mpsc::channel(4);
    let mut events = ReceiverStream::new(rx);
    let cancel = CancellationToken::new();

    tx.send(Event::opened(&room())).await.unwrap();
    let driver = {
        let cancel = cancel.clone();
        let mut sink = sink.clone();
        tokio::spawn(async move { encoder.drive(&cancel, &mut sink, &mut events).await })
    };

    assert!(wait_until(Duration::from_secs(2), || sink.frames().len() == 1).await);
    cancel.cancel();
    let exit = driver.await.unwrap().unwrap();

    assert_eq!(exit, DriveExit::Cancelled);
    assert!(tx.send(Event::new(&room(), json!({"late": true}))).await.is_err());
    assert_eq!(sink.frames().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_stream_gets_keepalive_flushes() {
    let encoder = SseEncoder::new(Some(Duration::from_secs(10)));
    let sink = RecordingSink::new();
    let (tx, rx) = mpsc::channel::<Event>(1);
    let mut events = ReceiverStream::new(rx);
    let cancel = CancellationToken::new();

    let driver = {
        let cancel = cancel.clone();
        let mut sink = sink.clone();
        tokio::spawn(async move { encoder.drive(&cancel, &mut sink, &mut events).await })
    };

    tokio::time::sleep(Duration::from_secs(35)).await;
    // Header flush plus three idle ticks.
    assert_eq!(sink.flushes(), 4);
    assert!(sink.text().is_empty());

    drop(tx);
    assert_eq!(driver.await.unwrap().unwrap(), DriveExit::UpstreamClosed);
}
