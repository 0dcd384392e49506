//! Ping-Pong: actor calls between fibers, optionally across processes.
//!
//! ```bash
//! # Both fibers in one process
//! cargo run --example ping_pong
//!
//! # Pong fiber behind a second router, reached over TCP loopback
//! cargo run --example ping_pong -- --remote --count 10
//! ```

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use fibernet::fibernet_transport::ChannelConfig;
use fibernet::{
    ActorContext, ActorId, ActorRequestHandler, Fiber, FiberConfig, HandlerError, JsonCodec,
    MailboxKind, Message, MessageRegistry, NetInner, ProcessConfig, ProcessRouter, Request,
    Response, TokioProviders,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "ping_pong")]
#[command(about = "Actor RPC between fibers and processes", long_about = None)]
struct Args {
    /// Number of pings to send
    #[arg(short, long, default_value_t = 5)]
    count: u32,

    /// Put the pong fiber in a second process connected over TCP
    #[arg(long)]
    remote: bool,

    /// Per-call timeout in milliseconds
    #[arg(long, default_value_t = 2_000)]
    timeout_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ping {
    rpc_id: u32,
    seq: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Pong {
    rpc_id: u32,
    error: i32,
    seq: u32,
    served: u32,
}

impl Message for Ping {
    const OPCODE: u16 = 1_001;
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
    const OPCODE: u16 = 1_002;
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
}

/// Counts the pings it answered.
#[derive(Default)]
struct Ponger {
    served: std::cell::Cell<u32>,
}

struct PingHandler;

#[async_trait(?Send)]
impl ActorRequestHandler<TokioProviders, JsonCodec> for PingHandler {
    type Entity = Ponger;
    type Request = Ping;

    async fn handle(
        &self,
        ctx: &ActorContext<TokioProviders, JsonCodec>,
        entity: Rc<Ponger>,
        request: Ping,
    ) -> Result<Pong, HandlerError> {
        entity.served.set(entity.served.get() + 1);
        tracing::info!(actor = %ctx.actor_id(), caller = %ctx.caller(), seq = request.seq, "ping");
        Ok(Pong {
            seq: request.seq,
            served: entity.served.get(),
            ..Pong::default()
        })
    }
}

fn fiber(
    router: &Arc<ProcessRouter>,
    id: u32,
    registry: &Rc<MessageRegistry<JsonCodec>>,
) -> Result<Fiber<TokioProviders, JsonCodec>, Box<dyn std::error::Error>> {
    let fiber = Fiber::new(
        TokioProviders::new(),
        router.clone(),
        id,
        registry.clone(),
        JsonCodec,
        FiberConfig::default(),
    )?;
    fiber.spawn();
    Ok(fiber)
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = MessageRegistry::new();
    registry.register_request::<Ping>()?;
    let registry = Rc::new(registry);

    let ping_router = ProcessRouter::new(1);
    let pong_router = if args.remote {
        ProcessRouter::new(2)
    } else {
        ping_router.clone()
    };

    // Keeps the inter-process links alive for the whole run.
    let mut links = Vec::new();
    if args.remote {
        let config = ProcessConfig::new(1).with_peer(1, "127.0.0.1:0");
        let ping_link = NetInner::start(
            TokioProviders::new(),
            ping_router.clone(),
            registry.clone(),
            JsonCodec,
            &config,
            ChannelConfig::local_network(),
        )
        .await?;
        let config = ProcessConfig::new(2).with_peer(2, "127.0.0.1:0");
        let pong_link = NetInner::start(
            TokioProviders::new(),
            pong_router.clone(),
            registry.clone(),
            JsonCodec,
            &config,
            ChannelConfig::local_network(),
        )
        .await?;
        ping_link.set_peer_address(2, pong_link.local_address());
        pong_link.set_peer_address(1, ping_link.local_address());
        tracing::info!(
            ping = ping_link.local_address(),
            pong = pong_link.local_address(),
            "processes linked"
        );
        links.push(ping_link);
        links.push(pong_link);
    }

    let pinger = fiber(&ping_router, 1, &registry)?;
    let ponger = fiber(&pong_router, 2, &registry)?;
    ponger.register_request_handler(PingHandler)?;
    let target: ActorId = ponger.add_entity(Ponger::default(), MailboxKind::Ordered)?;

    let timeout = Duration::from_millis(args.timeout_ms);
    for seq in 1..=args.count {
        let pong = pinger
            .call_with_timeout(target, Ping { seq, ..Ping::default() }, timeout)
            .await?;
        tracing::info!(seq = pong.seq, served = pong.served, "pong");
    }

    pinger.shutdown();
    ponger.shutdown();
    drop(links);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fibernet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    tracing::info!(count = args.count, remote = args.remote, "starting ping-pong");

    let local = tokio::task::LocalSet::new();
    local.run_until(run(args)).await
}
