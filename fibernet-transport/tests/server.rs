//! NetServer over real TCP loopback.

mod common;

use std::rc::Rc;
use std::time::Duration;

use common::{EchoServer, Ignore, echo, init_tracing, registry, run_local};
use fibernet_transport::{
    Channel, ChannelConfig, JsonCodec, NetServer, NetServerConfig, ServiceType, Session,
    SessionConfig, TokioProviders, error_code,
};

#[test]
fn test_accept_call_and_cleanup() {
    init_tracing();
    run_local(false, async {
        let providers = TokioProviders::new();
        let server = NetServer::bind(
            &providers,
            "127.0.0.1:0",
            NetServerConfig::new(ServiceType::Outer),
            registry(),
            JsonCodec,
            Rc::new(EchoServer::default()),
        )
        .await
        .expect("bind");

        let channel = Channel::connect(
            &providers,
            1,
            server.local_address(),
            ServiceType::Outer,
            ChannelConfig::local_network(),
        )
        .await
        .expect("connect");
        let client = Session::new(
            &providers,
            1,
            channel,
            registry(),
            JsonCodec,
            SessionConfig::default(),
            Rc::new(Ignore),
        );

        let response = client.call(echo("over tcp")).await.expect("call");
        assert_eq!(response.text, "over tcp");
        assert_eq!(server.sessions().len(), 1);

        client.dispose(error_code::ERR_SESSION_DISPOSED);
        for _ in 0..100 {
            if server.sessions().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(server.sessions().is_empty());
    });
}

#[test]
fn test_connect_refused() {
    run_local(false, async {
        let providers = TokioProviders::new();
        // Bind then drop to get a port with no listener.
        let address = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").to_string()
        };
        let result = Channel::connect(
            &providers,
            1,
            &address,
            ServiceType::Outer,
            ChannelConfig::local_network(),
        )
        .await;
        assert!(matches!(
            result,
            Err(fibernet_transport::ChannelError::ConnectFailed { .. })
        ));
    });
}

#[test]
fn test_shutdown_disposes_sessions() {
    init_tracing();
    run_local(false, async {
        let providers = TokioProviders::new();
        let server = NetServer::bind(
            &providers,
            "127.0.0.1:0",
            NetServerConfig::new(ServiceType::Outer),
            registry(),
            JsonCodec,
            Rc::new(EchoServer::default()),
        )
        .await
        .expect("bind");

        let channel = Channel::connect(
            &providers,
            1,
            server.local_address(),
            ServiceType::Outer,
            ChannelConfig::local_network(),
        )
        .await
        .expect("connect");
        let client = Session::new(
            &providers,
            1,
            channel,
            registry(),
            JsonCodec,
            SessionConfig::default(),
            Rc::new(Ignore),
        );
        client.call(echo("hello")).await.expect("call");

        server.shutdown();
        assert!(server.sessions().is_empty());

        client.closed().await;
        assert_eq!(client.disposed_error(), Some(error_code::ERR_PEER_DISCONNECTED));
    });
}
