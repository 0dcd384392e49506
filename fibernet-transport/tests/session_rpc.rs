//! Session RPC over an in-memory pipe.

mod common;

use std::rc::Rc;
use std::time::Duration;

use common::{EchoServer, echo, run_local, session_pair};
use fibernet_transport::{RpcError, SessionConfig, error_code};
use tokio_util::sync::CancellationToken;

#[test]
fn test_call_round_trip() {
    run_local(true, async {
        let (client, _server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());

        let response = client.call(echo("hello")).await.expect("call");
        assert_eq!(response.text, "hello");
        assert_eq!(response.error, 0);
        assert_eq!(client.pending_calls(), 0);
    });
}

#[test]
fn test_raising_error_fails_call() {
    run_local(true, async {
        let (client, _server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());

        let mut request = echo("x");
        request.fail_with = 42;
        match client.call(request).await {
            Err(RpcError::Remote { code, message }) => {
                assert_eq!(code, 42);
                assert_eq!(message, "failed with 42");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    });
}

#[test]
fn test_delivered_error_reaches_caller() {
    run_local(true, async {
        let (client, _server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());

        let mut request = echo("x");
        request.fail_with = error_code::ERR_NOT_FOUND_ACTOR;
        let response = client.call(request).await.expect("delivered");
        assert_eq!(response.error, error_code::ERR_NOT_FOUND_ACTOR);
    });
}

#[test]
fn test_concurrent_calls_resolve_independently() {
    run_local(true, async {
        let (client, _server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());

        let request = |text: &str, delay_ms| {
            let mut request = echo(text);
            request.delay_ms = delay_ms;
            request
        };
        let (a, b, c) = tokio::join!(
            client.call(request("a", 30)),
            client.call(request("b", 10)),
            client.call(request("c", 20)),
        );
        assert_eq!(a.expect("a").text, "a");
        assert_eq!(b.expect("b").text, "b");
        assert_eq!(c.expect("c").text, "c");
        assert_eq!(client.pending_calls(), 0);
    });
}

#[test]
fn test_cancel_synthesizes_response() {
    run_local(true, async {
        let (client, _server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut request = echo("never");
        request.hold = true;
        let response = client
            .call_with_cancel(request, &cancel)
            .await
            .expect("cancel is delivered");
        assert_eq!(response.error, error_code::ERR_CANCEL);
        assert_eq!(client.pending_calls(), 0);
    });
}

#[test]
fn test_timeout_removes_pending_call() {
    run_local(true, async {
        let (client, _server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());

        let mut request = echo("slow");
        request.hold = true;
        let result = client
            .call_with_timeout(request, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(RpcError::Timeout { .. })));
        assert_eq!(client.pending_calls(), 0);

        // The session stays usable.
        assert_eq!(client.call(echo("after")).await.expect("call").text, "after");
    });
}

#[test]
fn test_dropped_call_removes_pending_entry() {
    run_local(true, async {
        let (client, _server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());

        for _ in 0..5 {
            let mut request = echo("abandoned");
            request.hold = true;
            let result = tokio::time::timeout(Duration::from_millis(5), client.call(request)).await;
            assert!(result.is_err());
        }
        assert_eq!(client.pending_calls(), 0);

        // A call abandoned before its reply arrives leaves nothing behind.
        let mut request = echo("late");
        request.delay_ms = 50;
        let result = tokio::time::timeout(Duration::from_millis(5), client.call(request)).await;
        assert!(result.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.pending_calls(), 0);
        assert_eq!(client.call(echo("after")).await.expect("call").text, "after");
    });
}

#[test]
fn test_dispose_fails_pending_calls() {
    run_local(true, async {
        let (client, _server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());

        let mut request = echo("held");
        request.hold = true;
        let caller = client.clone();
        let pending = tokio::task::spawn_local(async move { caller.call(request).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.pending_calls(), 1);

        client.dispose(error_code::ERR_SESSION_DISPOSED);
        client.dispose(error_code::ERR_SESSION_DISPOSED);

        let result = pending.await.expect("join");
        assert_eq!(
            result.map(|r| r.text),
            Err(RpcError::SessionClosed {
                error: error_code::ERR_SESSION_DISPOSED
            })
        );
        assert!(matches!(
            client.call(echo("late")).await,
            Err(RpcError::SessionClosed { .. })
        ));
    });
}

#[test]
fn test_peer_drop_disposes_session() {
    run_local(true, async {
        let handler = Rc::new(EchoServer::default());
        let (client, server) = session_pair(handler, SessionConfig::default());

        let mut request = echo("held");
        request.hold = true;
        let caller = client.clone();
        let pending = tokio::task::spawn_local(async move { caller.call(request).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(server);

        let result = pending.await.expect("join");
        assert_eq!(
            result.map(|r| r.text),
            Err(RpcError::SessionClosed {
                error: error_code::ERR_PEER_DISCONNECTED
            })
        );
        assert_eq!(client.disposed_error(), Some(error_code::ERR_PEER_DISCONNECTED));
    });
}

#[test]
fn test_messages_reach_handler() {
    run_local(true, async {
        let handler = Rc::new(EchoServer::default());
        let notices = handler.notices.clone();
        let (client, _server) = session_pair(handler, SessionConfig::default());

        client
            .send(&common::Notice {
                text: "one".into(),
            })
            .expect("send");
        client
            .send(&common::Notice {
                text: "two".into(),
            })
            .expect("send");
        // A call after the notices proves they were processed first.
        client.call(echo("sync")).await.expect("call");

        assert_eq!(*notices.borrow(), vec!["one".to_string(), "two".to_string()]);
    });
}

#[test]
fn test_unmatched_response_is_dropped() {
    run_local(true, async {
        let (client, server) =
            session_pair(Rc::new(EchoServer::default()), SessionConfig::default());

        server
            .send(&common::EchoResponse {
                rpc_id: 999,
                text: "stray".into(),
                ..Default::default()
            })
            .expect("send");

        let response = client.call(echo("real")).await.expect("call");
        assert_eq!(response.text, "real");
        assert!(!client.is_disposed());
    });
}

#[test]
fn test_idle_session_is_disposed() {
    run_local(true, async {
        let config = SessionConfig::default()
            .with_idle_timeout(Duration::from_secs(5), Duration::from_secs(1));
        let handler = Rc::new(EchoServer::default());
        let disposed = handler.disposed.clone();
        let (client, server) = session_pair(handler, config);

        client.call(echo("warm")).await.expect("call");
        assert!(!client.is_disposed());

        client.closed().await;
        assert_eq!(client.disposed_error(), Some(error_code::ERR_SESSION_IDLE));

        // The server sees the connection go away.
        server.closed().await;
        assert_eq!(*disposed.borrow(), Some(error_code::ERR_PEER_DISCONNECTED));
    });
}
