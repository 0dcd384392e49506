//! Inter-process link.
//!
//! One [`NetInner`] per process carries envelopes between processes over
//! inner-framed [`Channel`]s:
//!
//! ```text
//!  process 1                                   process 2
//! ┌─────────┐ route  ┌──────────┐  link 1→2  ┌──────────┐ route  ┌─────────┐
//! │ fiber a │──────▶ │ NetInner │ ─────────▶ │ NetInner │──────▶ │ fiber b │
//! └─────────┘        └──────────┘            └──────────┘        └─────────┘
//!      ▲                  ▲          link 2→1      │
//!      └──────────────────┴────────────────────────┘
//! ```
//!
//! Links are one-directional: a process writes only on connections it
//! opened and reads only on connections it accepted, so a reply travels on
//! the responder's own link back. Every request written to a link is
//! remembered until its response arrives; when the link dies the caller
//! gets a fault with `ERR_PEER_DISCONNECTED`. A request unanswered for
//! longer than the in-flight TTL is forgotten, so callers that gave up do
//! not pin entries forever; such a request is no longer faulted when its
//! link dies.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::envelope::ActorEnvelope;
use super::error::DispatchError;
use super::router::ProcessRouter;
use crate::config::ProcessConfig;
use fibernet_core::{
    ActorId, MessageCodec, NetworkProvider, Providers, StreamListener, TaskProvider,
    TimeProvider, error_code,
};
use fibernet_transport::{
    Channel, ChannelConfig, ChannelError, ChannelEvent, MessageKind, MessageRegistry, Packet,
    ServiceType,
};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Default for [`NetInner::set_in_flight_ttl`].
pub const DEFAULT_IN_FLIGHT_TTL: Duration = Duration::from_secs(120);

type InFlight = HashMap<(ActorId, u32), Duration>;

struct LinkState {
    addresses: BTreeMap<u32, String>,
    links: HashMap<u32, mpsc::UnboundedSender<ActorEnvelope>>,
    /// Requests written towards each process, keyed by caller and rpc id,
    /// with the time they were forwarded.
    in_flight: HashMap<u32, InFlight>,
    in_flight_ttl: Duration,
    next_channel_id: u64,
}

struct NetInnerShared<P: Providers, C: MessageCodec> {
    providers: P,
    process: u32,
    router: Arc<ProcessRouter>,
    registry: Rc<MessageRegistry<C>>,
    codec: C,
    channel_config: ChannelConfig,
    state: RefCell<LinkState>,
    shutdown: CancellationToken,
}

/// Carries envelopes between this process and the others.
///
/// Must be created inside a `LocalSet`. Dropping it stops the link tasks
/// and detaches it from the router.
pub struct NetInner<P: Providers, C: MessageCodec> {
    shared: Rc<NetInnerShared<P, C>>,
    local_address: String,
}

impl<P: Providers, C: MessageCodec> NetInner<P, C> {
    /// Bind the listen address of `config.process` and attach to `router`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoRoute`] if the address book has no entry for this
    /// process, [`DispatchError::Channel`] if binding fails.
    pub async fn start(
        providers: P,
        router: Arc<ProcessRouter>,
        registry: Rc<MessageRegistry<C>>,
        codec: C,
        config: &ProcessConfig,
        channel_config: ChannelConfig,
    ) -> Result<Self, DispatchError> {
        let process = router.process();
        let address = config
            .address_of(process)
            .ok_or(DispatchError::NoRoute { process })?;
        let listener = providers
            .network()
            .bind(address)
            .await
            .map_err(ChannelError::from)?;
        let local_address = listener.local_addr().map_err(ChannelError::from)?;

        let state = LinkState {
            addresses: config.peers.clone(),
            links: HashMap::new(),
            in_flight: HashMap::new(),
            in_flight_ttl: DEFAULT_IN_FLIGHT_TTL,
            next_channel_id: 0,
        };
        let shared = Rc::new(NetInnerShared {
            providers: providers.clone(),
            process,
            router: router.clone(),
            registry,
            codec,
            channel_config,
            state: RefCell::new(state),
            shutdown: CancellationToken::new(),
        });

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        router.set_outbound(outbound_tx);

        providers
            .task()
            .spawn_task("net_inner_accept", accept_loop(shared.clone(), listener));
        providers
            .task()
            .spawn_task("net_inner_outbound", outbound_loop(shared.clone(), outbound_rx));

        tracing::info!(process, address = %local_address, "inner link listening");
        Ok(Self {
            shared,
            local_address,
        })
    }

    /// Address the listener is bound to.
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Add or replace the address of another process.
    ///
    /// Takes effect on the next connection to it.
    pub fn set_peer_address(&self, process: u32, address: impl Into<String>) {
        self.shared
            .state
            .borrow_mut()
            .addresses
            .insert(process, address.into());
    }

    /// Requests written towards `process` that have no response yet.
    pub fn in_flight(&self, process: u32) -> usize {
        self.shared
            .state
            .borrow()
            .in_flight
            .get(&process)
            .map_or(0, HashMap::len)
    }

    /// How long a forwarded request is tracked without a response.
    pub fn set_in_flight_ttl(&self, ttl: Duration) {
        self.shared.state.borrow_mut().in_flight_ttl = ttl;
    }

    /// Whether a link to `process` is open or opening.
    pub fn has_link(&self, process: u32) -> bool {
        self.shared.state.borrow().links.contains_key(&process)
    }

    /// Stop all link tasks and detach from the router.
    ///
    /// Requests still in flight are faulted.
    pub fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        self.shared.router.clear_outbound();
        let processes: Vec<u32> = self.shared.state.borrow().links.keys().copied().collect();
        for process in processes {
            self.shared.link_failed(process, "shutdown");
        }
    }
}

impl<P: Providers, C: MessageCodec> Drop for NetInner<P, C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<P: Providers, C: MessageCodec> NetInnerShared<P, C> {
    fn next_channel_id(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.next_channel_id += 1;
        state.next_channel_id
    }

    /// Queue an envelope on the link to its process, opening it if needed.
    fn forward(self: &Rc<Self>, envelope: ActorEnvelope) {
        let process = envelope.target.process();
        let now = self.providers.time().now();
        let mut state = self.state.borrow_mut();
        if envelope.kind == MessageKind::Request {
            let ttl = state.in_flight_ttl;
            let calls = state.in_flight.entry(process).or_default();
            let before = calls.len();
            calls.retain(|_, sent| now.saturating_sub(*sent) < ttl);
            if calls.len() < before {
                tracing::debug!(
                    process,
                    expired = before - calls.len(),
                    "unanswered requests forgotten"
                );
            }
            calls.insert((envelope.from, envelope.rpc_id), now);
        }

        let link = match state.links.get(&process) {
            Some(link) => link.clone(),
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                state.links.insert(process, tx.clone());
                self.providers
                    .task()
                    .spawn_task("net_inner_link", link_task(self.clone(), process, rx));
                tx
            }
        };
        drop(state);

        // The link task only drops its queue after removing itself.
        if link.send(envelope).is_err() {
            tracing::debug!(process, "link queue closed");
        }
    }

    /// Forget the link to `process` and fault every request sent on it.
    fn link_failed(&self, process: u32, reason: &str) {
        let calls = {
            let mut state = self.state.borrow_mut();
            state.links.remove(&process);
            state.in_flight.remove(&process).unwrap_or_default()
        };
        tracing::warn!(
            local = self.process,
            remote = process,
            reason,
            faulted = calls.len(),
            "inner link lost"
        );
        for (caller, rpc_id) in calls.into_keys() {
            self.router
                .deliver_fault(caller, rpc_id, error_code::ERR_PEER_DISCONNECTED);
        }
    }

    fn write(&self, channel: &Channel, envelope: &ActorEnvelope) -> Result<(), DispatchError> {
        let target = envelope.target.to_wire()?;
        let body = envelope.inner_body()?;
        channel.send(envelope.opcode, target, &body)?;
        Ok(())
    }

    fn fault_one(&self, envelope: &ActorEnvelope, error: i32) {
        if envelope.kind != MessageKind::Request {
            return;
        }
        let process = envelope.target.process();
        if let Some(calls) = self.state.borrow_mut().in_flight.get_mut(&process) {
            calls.remove(&(envelope.from, envelope.rpc_id));
        }
        self.router.deliver_fault(envelope.from, envelope.rpc_id, error);
    }

    /// Route an envelope read from an accepted connection.
    fn on_ingress(&self, packet: Packet) {
        let decoded =
            ActorEnvelope::from_inner_packet(packet, self.process, &self.registry, &self.codec);
        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    process = self.process,
                    error = %e,
                    "undecodable inner packet dropped"
                );
                return;
            }
        };

        if envelope.kind == MessageKind::Response
            && let Some(calls) = self
                .state
                .borrow_mut()
                .in_flight
                .get_mut(&envelope.from.process())
        {
            calls.remove(&(envelope.target, envelope.rpc_id));
        }

        let (kind, from, target, opcode, rpc_id) = (
            envelope.kind,
            envelope.from,
            envelope.target,
            envelope.opcode,
            envelope.rpc_id,
        );
        let Err(e) = self.router.route(envelope) else {
            return;
        };
        if kind != MessageKind::Request {
            tracing::warn!(actor = %target, opcode, error = %e, "inbound envelope undeliverable");
            return;
        }

        match self.registry.error_response(
            &self.codec,
            opcode,
            rpc_id,
            error_code::ERR_NOT_FOUND_ACTOR,
            &e.to_string(),
        ) {
            Some(Ok((response_opcode, body))) => {
                let response = ActorEnvelope {
                    kind: MessageKind::Response,
                    from: target,
                    target: from,
                    opcode: response_opcode,
                    rpc_id,
                    body,
                };
                if let Err(e) = self.router.route(response) {
                    tracing::warn!(to = %from, rpc_id, error = %e, "not-found reply undeliverable");
                }
            }
            Some(Err(e)) => tracing::error!(error = %e, "error response encoding failed"),
            None => tracing::warn!(opcode, "request opcode not registered, cannot answer"),
        }
    }
}

async fn outbound_loop<P: Providers, C: MessageCodec>(
    shared: Rc<NetInnerShared<P, C>>,
    mut outbound: mpsc::UnboundedReceiver<ActorEnvelope>,
) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            envelope = outbound.recv() => match envelope {
                Some(envelope) => shared.forward(envelope),
                None => return,
            },
        }
    }
}

async fn link_task<P: Providers, C: MessageCodec>(
    shared: Rc<NetInnerShared<P, C>>,
    process: u32,
    mut queue: mpsc::UnboundedReceiver<ActorEnvelope>,
) {
    let address = shared.state.borrow().addresses.get(&process).cloned();
    let Some(address) = address else {
        shared.link_failed(process, "no address");
        return;
    };

    let id = shared.next_channel_id();
    let connect = Channel::connect(
        &shared.providers,
        id,
        &address,
        ServiceType::Inner,
        shared.channel_config.clone(),
    );
    let mut channel = tokio::select! {
        _ = shared.shutdown.cancelled() => return,
        connected = connect => match connected {
            Ok(channel) => channel,
            Err(e) => {
                shared.link_failed(process, &e.to_string());
                return;
            }
        },
    };
    let Some(mut events) = channel.take_events() else {
        shared.link_failed(process, "channel events unavailable");
        return;
    };
    tracing::debug!(local = shared.process, remote = process, %address, "inner link open");

    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return,
            event = events.recv() => match event {
                Some(ChannelEvent::Packet(packet)) => {
                    tracing::debug!(
                        remote = process,
                        opcode = packet.opcode,
                        "packet on outbound link ignored"
                    );
                }
                Some(ChannelEvent::Error(e)) => {
                    shared.link_failed(process, &e.to_string());
                    return;
                }
                None => {
                    shared.link_failed(process, "channel closed");
                    return;
                }
            },
            envelope = queue.recv() => match envelope {
                Some(envelope) => match shared.write(&channel, &envelope) {
                    Ok(()) => {}
                    Err(DispatchError::Channel(e))
                        if e.error_code() == error_code::ERR_PEER_DISCONNECTED =>
                    {
                        shared.fault_one(&envelope, e.error_code());
                        shared.link_failed(process, &e.to_string());
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            actor = %envelope.target,
                            error = %e,
                            "envelope not sent"
                        );
                        shared.fault_one(&envelope, e.error_code());
                    }
                },
                None => return,
            },
        }
    }
}

async fn accept_loop<P: Providers, C: MessageCodec>(
    shared: Rc<NetInnerShared<P, C>>,
    listener: <P::Network as NetworkProvider>::Listener,
) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                let error = ChannelError::from(e);
                tracing::warn!(%error, "inner accept failed");
                shared.providers.time().sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let id = shared.next_channel_id();
        let channel = Channel::new(
            &shared.providers,
            id,
            stream,
            ServiceType::Inner,
            shared.channel_config.clone(),
        )
        .with_remote_address(peer.clone());
        tracing::debug!(local = shared.process, %peer, "inner link accepted");
        shared
            .providers
            .task()
            .spawn_task("net_inner_ingress", ingress_task(shared.clone(), channel));
    }
}

async fn ingress_task<P: Providers, C: MessageCodec>(
    shared: Rc<NetInnerShared<P, C>>,
    mut channel: Channel,
) {
    let Some(mut events) = channel.take_events() else {
        return;
    };
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(ChannelEvent::Packet(packet)) => shared.on_ingress(packet),
                Some(ChannelEvent::Error(e)) => {
                    tracing::debug!(
                        channel = channel.id(),
                        error = %e,
                        "inbound inner link closed"
                    );
                    break;
                }
                None => break,
            },
        }
    }
    channel.close();
}
