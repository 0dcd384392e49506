//! Shared messages, entities and handlers for fibernet integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fibernet::{
    ActorContext, ActorId, ActorMessageHandler, ActorRequestHandler, Fiber, FiberConfig,
    HandlerError, JsonCodec, Message, MessageRegistry, ProcessRouter, Request, Response,
    TokioProviders,
};
use serde::{Deserialize, Serialize};

pub type TestFiber = Fiber<TokioProviders, JsonCodec>;
pub type TestContext = ActorContext<TokioProviders, JsonCodec>;

/// Request answered by [`Echoer`] entities.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub rpc_id: u32,
    pub text: String,
    /// Handler sleeps this long before answering.
    pub delay_ms: u64,
    /// Non-zero: the handler fails with this code.
    pub fail_with: i32,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Pong {
    pub rpc_id: u32,
    pub error: i32,
    pub message: Option<String>,
    pub text: String,
    pub responder: ActorId,
    pub caller: ActorId,
}

/// Fire-and-forget note recorded by [`Echoer`] entities.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
}

/// Ask an entity to ping another actor and report the answer.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Relay {
    pub rpc_id: u32,
    pub target: ActorId,
    pub text: String,
}

impl Message for Ping {
    const OPCODE: u16 = 200;
}

impl Request for Ping {
    type Response = Pong;

    fn rpc_id(&self) -> u32 {
        self.rpc_id
    }

    fn set_rpc_id(&mut self, rpc_id: u32) {
        self.rpc_id = rpc_id;
    }
}

impl Message for Pong {
    const OPCODE: u16 = 201;
}

impl Response for Pong {
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
        self.message.as_deref()
    }

    fn set_error_message(&mut self, message: String) {
        self.message = Some(message);
    }
}

impl Message for Note {
    const OPCODE: u16 = 202;
}

impl Message for Relay {
    const OPCODE: u16 = 203;
}

impl Request for Relay {
    type Response = Pong;

    fn rpc_id(&self) -> u32 {
        self.rpc_id
    }

    fn set_rpc_id(&mut self, rpc_id: u32) {
        self.rpc_id = rpc_id;
    }
}

pub fn ping(text: &str) -> Ping {
    Ping {
        text: text.to_string(),
        ..Ping::default()
    }
}

pub fn slow_ping(text: &str, delay_ms: u64) -> Ping {
    Ping {
        delay_ms,
        ..ping(text)
    }
}

pub fn registry() -> Rc<MessageRegistry<JsonCodec>> {
    let mut registry = MessageRegistry::new();
    registry.register_request::<Ping>().expect("ping");
    registry.register_request::<Relay>().expect("relay");
    registry.register_message::<Note>().expect("note");
    Rc::new(registry)
}

/// Entity that records what it handled.
#[derive(Default)]
pub struct Echoer {
    pub log: RefCell<Vec<String>>,
    pub active: Cell<u32>,
    pub max_active: Cell<u32>,
}

/// Entity type with no handlers.
pub struct Mute;

pub struct PingHandler;

#[async_trait(?Send)]
impl ActorRequestHandler<TokioProviders, JsonCodec> for PingHandler {
    type Entity = Echoer;
    type Request = Ping;

    async fn handle(
        &self,
        ctx: &TestContext,
        entity: Rc<Echoer>,
        request: Ping,
    ) -> Result<Pong, HandlerError> {
        entity.active.set(entity.active.get() + 1);
        entity
            .max_active
            .set(entity.max_active.get().max(entity.active.get()));
        if request.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(request.delay_ms)).await;
        }
        entity.active.set(entity.active.get() - 1);
        entity.log.borrow_mut().push(request.text.clone());

        if request.fail_with != 0 {
            return Err(HandlerError::new(request.fail_with, "asked to fail"));
        }
        Ok(Pong {
            text: request.text,
            responder: ctx.actor_id(),
            caller: ctx.caller(),
            ..Pong::default()
        })
    }
}

pub struct NoteHandler;

#[async_trait(?Send)]
impl ActorMessageHandler<TokioProviders, JsonCodec> for NoteHandler {
    type Entity = Echoer;
    type Message = Note;

    async fn handle(&self, _ctx: &TestContext, entity: Rc<Echoer>, message: Note) {
        entity.log.borrow_mut().push(message.text);
    }
}

pub struct RelayHandler;

#[async_trait(?Send)]
impl ActorRequestHandler<TokioProviders, JsonCodec> for RelayHandler {
    type Entity = Echoer;
    type Request = Relay;

    async fn handle(
        &self,
        ctx: &TestContext,
        _entity: Rc<Echoer>,
        request: Relay,
    ) -> Result<Pong, HandlerError> {
        let pong = ctx.call(request.target, ping(&request.text)).await?;
        Ok(Pong {
            text: format!("relayed {}", pong.text),
            responder: pong.responder,
            caller: pong.caller,
            ..Pong::default()
        })
    }
}

/// A fiber with the echo handlers registered.
pub fn echo_fiber(router: &Arc<ProcessRouter>, fiber_id: u32) -> TestFiber {
    let fiber = Fiber::new(
        TokioProviders::new(),
        router.clone(),
        fiber_id,
        registry(),
        JsonCodec,
        FiberConfig::default(),
    )
    .expect("fiber");
    fiber.register_request_handler(PingHandler).expect("ping handler");
    fiber.register_message_handler(NoteHandler).expect("note handler");
    fiber.register_request_handler(RelayHandler).expect("relay handler");
    fiber
}

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
