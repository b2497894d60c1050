use bytes::Bytes;

use ferry_core::{Message, Response, StreamRequest, TransferConfig};

use crate::{settle, FakeCatalog, Harness};

fn open(stream_id: &str) -> Message {
    StreamRequest {
        stream_id: stream_id.to_string(),
    }
    .into()
}

#[tokio::test]
async fn stream_is_sent_with_its_size() {
    let h = Harness::with_defaults();
    h.catalog.add_stream("logs/app.1", Bytes::from_static(b"line one\nline two\n"));

    h.handle(open("logs/app.1"));

    match &h.channel.sent()[..] {
        [Response::StreamResponse {
            stream_id,
            byte_count,
            body,
        }] => {
            assert_eq!(stream_id, "logs/app.1");
            assert_eq!(*byte_count, 18);
            assert_eq!(&body[..], b"line one\nline two\n");
        }
        other => panic!("expected one StreamResponse, got {other:?}"),
    }
    assert_eq!(FakeCatalog::count(&h.catalog.streams_being_sent), 1);

    settle().await;
    assert_eq!(FakeCatalog::count(&h.catalog.streams_sent), 1);
}

#[tokio::test]
async fn missing_stream_is_reported_by_name() {
    let h = Harness::with_defaults();

    h.handle(open("9"));

    assert_eq!(
        h.channel.sent(),
        vec![Response::StreamFailure {
            stream_id: "9".into(),
            error: "Stream '9' was not found.".into(),
        }]
    );
    assert_eq!(FakeCatalog::count(&h.catalog.streams_being_sent), 0);
}

#[tokio::test]
async fn open_error_becomes_stream_failure() {
    let h = Harness::with_defaults();
    h.catalog.break_stream("s1", "index corrupted");

    h.handle(open("s1"));

    match &h.channel.sent()[..] {
        [Response::StreamFailure { stream_id, error }] => {
            assert_eq!(stream_id, "s1");
            assert!(error.contains("index corrupted"), "error was: {error}");
        }
        other => panic!("expected one StreamFailure, got {other:?}"),
    }
    assert!(!h.channel.is_closed());
}

#[tokio::test]
async fn stream_request_respects_admission_limit() {
    let h = Harness::new(TransferConfig {
        max_chunks_being_transferred: 2,
        ..Default::default()
    });
    h.catalog.add_stream("s1", Bytes::from_static(b"data"));
    h.catalog.set_in_flight(2);

    h.handle(open("s1"));

    assert!(h.channel.is_closed());
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn failed_stream_write_still_reports_completion() {
    let h = Harness::with_defaults();
    h.catalog.add_stream("s1", Bytes::from_static(b"data"));
    h.channel.fail_sends();

    h.handle(open("s1"));
    settle().await;

    assert!(h.channel.is_closed());
    assert_eq!(FakeCatalog::count(&h.catalog.streams_sent), 1);
}
