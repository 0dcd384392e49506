//! Shared fixtures for transport integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use fibernet_transport::{
    Channel, ChannelConfig, JsonCodec, Message, MessageRegistry, Packet, Providers, Request,
    Response, ServiceType, Session, SessionConfig, SessionHandler, TimeProvider, TokioProviders,
};
use serde::{Deserialize, Serialize};

pub type TestSession = Session<TokioProviders, JsonCodec>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EchoRequest {
    pub rpc_id: u32,
    pub text: String,
    /// Error code the server puts in the response.
    pub fail_with: i32,
    /// Server waits this long before replying.
    pub delay_ms: u64,
    /// Server never replies.
    pub hold: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EchoResponse {
    pub rpc_id: u32,
    pub error: i32,
    pub message: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub text: String,
}

impl Message for EchoRequest {
    const OPCODE: u16 = 100;
}

impl Request for EchoRequest {
    type Response = EchoResponse;

    fn rpc_id(&self) -> u32 {
        self.rpc_id
    }

    fn set_rpc_id(&mut self, rpc_id: u32) {
        self.rpc_id = rpc_id;
    }
}

impl Message for EchoResponse {
    const OPCODE: u16 = 101;
}

impl Response for EchoResponse {
    fn rpc_id(&self) -> u32 {
        self.rpc_id
    }

    fn set_rpc_id(&mut self, rpc_id: u32) {
        self.rpc_id = rpc_id;
    }

    fn error(&self) -> i32 {
        self.error
    }

    fn set_error(&mut self, error: i32) {
        self.error = error;
    }

    fn error_message(&self) -> Option<&str> {
        Some(&self.message)
    }

    fn set_error_message(&mut self, message: String) {
        self.message = message;
    }
}

impl Message for Notice {
    const OPCODE: u16 = 102;
}

pub fn echo(text: &str) -> EchoRequest {
    EchoRequest {
        text: text.to_string(),
        ..Default::default()
    }
}

pub fn registry() -> Rc<MessageRegistry<JsonCodec>> {
    let mut registry = MessageRegistry::new();
    registry
        .register_request::<EchoRequest>()
        .expect("register echo");
    registry.register_message::<Notice>().expect("register notice");
    Rc::new(registry)
}

/// Handler that drops everything.
pub struct Ignore;

impl SessionHandler<TokioProviders, JsonCodec> for Ignore {
    fn on_packet(&self, _session: &TestSession, _packet: Packet) {}
}

/// Serves `EchoRequest` and records notices.
#[derive(Default)]
pub struct EchoServer {
    pub notices: Rc<RefCell<Vec<String>>>,
    pub disposed: Rc<RefCell<Option<i32>>>,
}

impl SessionHandler<TokioProviders, JsonCodec> for EchoServer {
    fn on_packet(&self, session: &TestSession, packet: Packet) {
        match packet.opcode {
            EchoRequest::OPCODE => {
                let request: EchoRequest = session.decode(&packet).expect("decode request");
                if request.hold {
                    return;
                }
                let response = EchoResponse {
                    rpc_id: request.rpc_id,
                    error: request.fail_with,
                    message: if request.fail_with != 0 {
                        format!("failed with {}", request.fail_with)
                    } else {
                        String::new()
                    },
                    text: request.text,
                };
                let session = session.clone();
                tokio::task::spawn_local(async move {
                    if request.delay_ms > 0 {
                        session
                            .providers()
                            .time()
                            .sleep(Duration::from_millis(request.delay_ms))
                            .await;
                    }
                    let _ = session.send(&response);
                });
            }
            Notice::OPCODE => {
                let notice: Notice = session.decode(&packet).expect("decode notice");
                self.notices.borrow_mut().push(notice.text);
            }
            other => panic!("unexpected opcode {other}"),
        }
    }

    fn on_disposed(&self, _session: &TestSession, error: i32) {
        *self.disposed.borrow_mut() = Some(error);
    }
}

/// Client and server sessions joined by an in-memory pipe.
pub fn session_pair(
    server: Rc<dyn SessionHandler<TokioProviders, JsonCodec>>,
    client_config: SessionConfig,
) -> (TestSession, TestSession) {
    let providers = TokioProviders::new();
    let (a, b) = tokio::io::duplex(1024);
    let registry = registry();

    let client_channel =
        Channel::new(&providers, 1, a, ServiceType::Outer, ChannelConfig::default());
    let server_channel =
        Channel::new(&providers, 2, b, ServiceType::Outer, ChannelConfig::default());

    let client = Session::new(
        &providers,
        1,
        client_channel,
        registry.clone(),
        JsonCodec,
        client_config,
        Rc::new(Ignore),
    );
    let server = Session::new(
        &providers,
        2,
        server_channel,
        registry,
        JsonCodec,
        SessionConfig::default(),
        server,
    );
    (client, server)
}

/// Run `f` on a current-thread runtime inside a `LocalSet`.
pub fn run_local<F: std::future::Future<Output = ()>>(paused: bool, f: F) {
    let mut builder = tokio::runtime::Builder::new_current_thread();
    builder.enable_all();
    if paused {
        builder.start_paused(true);
    }
    let rt = builder.build().expect("runtime");
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, f);
}

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
