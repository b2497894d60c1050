use bytes::Bytes;

use ferry_core::{Message, OneWayMessage, Response, RpcRequest};

use crate::{settle, Harness, RpcBehavior};

fn rpc(request_id: u64, body: &'static [u8]) -> Message {
    RpcRequest {
        request_id,
        body: Bytes::from_static(body),
    }
    .into()
}

fn one_way(body: &'static [u8]) -> Message {
    OneWayMessage {
        body: Bytes::from_static(body),
    }
    .into()
}

#[tokio::test]
async fn rpc_success_is_keyed_by_request_id() {
    let h = Harness::with_defaults();

    h.handle(rpc(41, b"ping"));

    assert_eq!(
        h.channel.sent(),
        vec![Response::RpcResponse {
            request_id: 41,
            body: Bytes::from_static(b"ping"),
        }]
    );
}

#[tokio::test]
async fn callback_failure_becomes_rpc_failure() {
    let h = Harness::with_defaults();
    h.rpc.set_behavior(RpcBehavior::FailCallback("no such method".into()));

    h.handle(rpc(7, b"call"));

    match &h.channel.sent()[..] {
        [Response::RpcFailure { request_id, error }] => {
            assert_eq!(*request_id, 7);
            assert!(error.contains("no such method"), "error was: {error}");
        }
        other => panic!("expected one RpcFailure, got {other:?}"),
    }
    assert!(!h.channel.is_closed());
}

#[tokio::test]
async fn synchronous_error_becomes_rpc_failure() {
    let h = Harness::with_defaults();
    h.rpc.set_behavior(RpcBehavior::FailSync("handler panicked on decode".into()));

    h.handle(rpc(8, b"garbage"));

    match &h.channel.sent()[..] {
        [Response::RpcFailure { request_id, error }] => {
            assert_eq!(*request_id, 8);
            assert!(error.contains("decode"), "error was: {error}");
        }
        other => panic!("expected one RpcFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn deferred_reply_is_sent_when_the_service_completes() {
    let h = Harness::with_defaults();
    h.rpc.set_behavior(RpcBehavior::Defer);

    h.handle(rpc(1, b"slow"));
    h.handle(rpc(2, b"slower"));
    assert!(h.channel.sent().is_empty());

    let mut deferred = std::mem::take(&mut *h.rpc.deferred.lock().unwrap());
    let second = deferred.pop().unwrap();
    let first = deferred.pop().unwrap();

    // Complete from another thread, out of order.
    std::thread::spawn(move || {
        second.on_success(Bytes::from_static(b"two"));
        first.on_failure(anyhow::anyhow!("timed out"));
    })
    .join()
    .unwrap();
    settle().await;

    assert_eq!(
        h.channel.sent(),
        vec![
            Response::RpcResponse {
                request_id: 2,
                body: Bytes::from_static(b"two"),
            },
            Response::RpcFailure {
                request_id: 1,
                error: "timed out".into(),
            },
        ]
    );
}

#[tokio::test]
async fn one_way_reaches_service_without_reply() {
    let h = Harness::with_defaults();

    h.handle(one_way(b"heartbeat"));

    assert_eq!(
        *h.rpc.one_way.lock().unwrap(),
        vec![Bytes::from_static(b"heartbeat")]
    );
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn one_way_errors_are_swallowed() {
    let h = Harness::with_defaults();
    h.rpc.fail_one_way();

    h.handle(one_way(b"bad"));
    h.handle(one_way(b"worse"));

    assert_eq!(h.rpc.one_way.lock().unwrap().len(), 2);
    assert!(h.channel.sent().is_empty());
    assert!(!h.channel.is_closed());
}
