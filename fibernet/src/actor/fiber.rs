//! Fibers: single-threaded actor contexts.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::context::ActorContext;
use super::entity::{EntityRegistry, EntitySlot, MailboxKind};
use super::envelope::{ActorEnvelope, InboundItem};
use super::error::DispatchError;
use super::handlers::{ActorMessageHandler, ActorRequestHandler, HandlerRegistry};
use super::router::ProcessRouter;
use super::sender::ActorSender;
use crate::lock::{CoroutineLockManager, CoroutineLockType};
use fibernet_core::{
    ActorId, Address, InstanceIdGenerator, Message, MessageCodec, Providers, Request,
    TaskProvider, TimeProvider, error_code,
};
use fibernet_transport::{MessageKind, MessageRegistry};

/// Fiber tuning.
#[derive(Debug, Clone)]
pub struct FiberConfig {
    /// How often lock timers and deferred hand-offs are serviced.
    pub tick_interval: Duration,
    /// How long a message may wait for its entity's mailbox.
    pub lock_timeout: Duration,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
            lock_timeout: Duration::from_secs(60),
        }
    }
}

impl FiberConfig {
    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the mailbox lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

struct FiberInner<P: Providers, C: MessageCodec> {
    providers: P,
    address: Address,
    router: Arc<ProcessRouter>,
    registry: Rc<MessageRegistry<C>>,
    codec: C,
    config: FiberConfig,
    ids: InstanceIdGenerator,
    locks: CoroutineLockManager<P::Time>,
    entities: RefCell<EntityRegistry>,
    handlers: RefCell<HandlerRegistry<P, C>>,
    sender: ActorSender<P::Time, C>,
    inbound: RefCell<Option<mpsc::UnboundedReceiver<InboundItem>>>,
    shutdown: CancellationToken,
}

impl<P: Providers, C: MessageCodec> Drop for FiberInner<P, C> {
    fn drop(&mut self) {
        self.router.unregister_fiber(self.address.fiber);
    }
}

/// A single-threaded actor context.
///
/// Owns its entities, handlers, mailbox locks and pending calls. All state
/// sits behind `Rc`, so a fiber never leaves the thread that created it;
/// other fibers reach it only through the [`ProcessRouter`] queue.
///
/// # Inbound processing
///
/// - responses and faults resolve pending calls
/// - requests and messages for a missing entity: the request gets an
///   `ERR_NOT_FOUND_ACTOR` response, the message is dropped
/// - otherwise an [`Ordered`](MailboxKind::Ordered) entity waits for its
///   mailbox lock, then the entity is looked up again and the handler runs
///   only if it is still the same registration
pub struct Fiber<P: Providers, C: MessageCodec> {
    inner: Rc<FiberInner<P, C>>,
}

impl<P: Providers, C: MessageCodec> Clone for Fiber<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Providers, C: MessageCodec> Fiber<P, C> {
    /// Create fiber `fiber_id` and register it with `router`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::FiberExists`] if the id is taken.
    pub fn new(
        providers: P,
        router: Arc<ProcessRouter>,
        fiber_id: u32,
        registry: Rc<MessageRegistry<C>>,
        codec: C,
        config: FiberConfig,
    ) -> Result<Self, DispatchError> {
        let address = Address::new(router.process(), fiber_id);
        // Rejects ids that do not fit the wire encoding.
        address.fiber_actor().to_wire()?;
        let inbound = router.register_fiber(fiber_id)?;
        let time = providers.time().clone();

        tracing::debug!(%address, "fiber created");

        Ok(Self {
            inner: Rc::new(FiberInner {
                locks: CoroutineLockManager::new(time.clone()),
                sender: ActorSender::new(
                    router.clone(),
                    address.fiber_actor(),
                    codec.clone(),
                    time,
                ),
                providers,
                address,
                router,
                registry,
                codec,
                config,
                ids: InstanceIdGenerator::new(),
                entities: RefCell::new(EntityRegistry::default()),
                handlers: RefCell::new(HandlerRegistry::new()),
                inbound: RefCell::new(Some(inbound)),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Address of this fiber.
    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Actor id of the fiber itself; calls are issued from it.
    pub fn actor_id(&self) -> ActorId {
        self.inner.address.fiber_actor()
    }

    /// Providers the fiber runs on.
    pub fn providers(&self) -> &P {
        &self.inner.providers
    }

    /// Codec used for message bodies.
    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    /// Opcode table shared by the process.
    pub fn registry(&self) -> &MessageRegistry<C> {
        &self.inner.registry
    }

    /// Router of the process.
    pub fn router(&self) -> &Arc<ProcessRouter> {
        &self.inner.router
    }

    /// The fiber's coroutine lock manager.
    pub fn locks(&self) -> &CoroutineLockManager<P::Time> {
        &self.inner.locks
    }

    /// Handle for sending and calling from this fiber.
    pub fn sender(&self) -> &ActorSender<P::Time, C> {
        &self.inner.sender
    }

    /// Register an entity with a fresh instance id.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Address`] once the instance sequence is
    /// exhausted.
    pub fn add_entity<E: 'static>(
        &self,
        entity: E,
        mailbox: MailboxKind,
    ) -> Result<ActorId, DispatchError> {
        let instance_id = self.inner.ids.next_id()?;
        self.inner
            .entities
            .borrow_mut()
            .insert(instance_id, Rc::new(entity), mailbox);
        let id = ActorId::new(self.inner.address, instance_id);
        tracing::debug!(actor = %id, entity = std::any::type_name::<E>(), ?mailbox, "entity added");
        Ok(id)
    }

    /// Unregister an entity. Messages already waiting for its mailbox are
    /// answered as not found.
    pub fn remove_entity(&self, id: ActorId) -> bool {
        if id.address != self.inner.address {
            return false;
        }
        let removed = self.inner.entities.borrow_mut().remove(id.instance_id);
        if let Some(slot) = &removed {
            tracing::debug!(actor = %id, entity = slot.type_name, "entity removed");
        }
        removed.is_some()
    }

    /// Look up an entity by id and type.
    pub fn entity<E: 'static>(&self, id: ActorId) -> Option<Rc<E>> {
        if id.address != self.inner.address {
            return None;
        }
        self.inner.entities.borrow().get::<E>(id.instance_id)
    }

    /// Number of registered entities.
    pub fn entity_count(&self) -> usize {
        self.inner.entities.borrow().len()
    }

    /// Register a message handler for `(H::Entity, H::Message)`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DuplicateHandler`] if the pair already has one.
    pub fn register_message_handler<H>(&self, handler: H) -> Result<(), DispatchError>
    where
        H: ActorMessageHandler<P, C>,
    {
        self.inner
            .handlers
            .borrow_mut()
            .register_message(handler, self.inner.codec.clone())
    }

    /// Register a request handler for `(H::Entity, H::Request)`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DuplicateHandler`] if the pair already has one.
    pub fn register_request_handler<H>(&self, handler: H) -> Result<(), DispatchError>
    where
        H: ActorRequestHandler<P, C>,
    {
        self.inner
            .handlers
            .borrow_mut()
            .register_request(handler, self.inner.codec.clone())
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// Send a message from this fiber.
    ///
    /// # Errors
    ///
    /// See [`ActorSender::send`].
    pub fn send<M: Message>(&self, target: ActorId, message: &M) -> Result<(), DispatchError> {
        self.inner.sender.send(target, message)
    }

    /// Call an actor from this fiber.
    ///
    /// # Errors
    ///
    /// See [`ActorSender::call`].
    pub async fn call<R: Request>(
        &self,
        target: ActorId,
        request: R,
    ) -> Result<R::Response, DispatchError> {
        self.inner.sender.call(target, request).await
    }

    /// Call with a deadline.
    ///
    /// # Errors
    ///
    /// See [`ActorSender::call_with_timeout`].
    pub async fn call_with_timeout<R: Request>(
        &self,
        target: ActorId,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response, DispatchError> {
        self.inner.sender.call_with_timeout(target, request, timeout).await
    }

    /// Spawn [`run`](Self::run) on the current `LocalSet`.
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let fiber = self.clone();
        self.inner
            .providers
            .task()
            .spawn_task("fiber_run", async move { fiber.run().await })
    }

    /// Drain the inbound queue and service lock timers until
    /// [`shutdown`](Self::shutdown).
    ///
    /// Only the first call runs; later calls return at once.
    pub async fn run(&self) {
        let Some(mut inbound) = self.inner.inbound.borrow_mut().take() else {
            tracing::warn!(address = %self.inner.address, "fiber already running");
            return;
        };
        let time = self.inner.providers.time().clone();
        let interval = self.inner.config.tick_interval;
        let mut next_tick = time.now() + interval;

        tracing::debug!(address = %self.inner.address, "fiber running");
        loop {
            let until_tick = next_tick.saturating_sub(time.now());
            tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                item = inbound.recv() => match item {
                    Some(item) => self.on_inbound(item),
                    None => break,
                },
                _ = time.sleep(until_tick) => {
                    self.inner.locks.tick();
                    next_tick = time.now() + interval;
                }
            }
        }

        self.inner.router.unregister_fiber(self.inner.address.fiber);
        self.inner.sender.fail_all(error_code::ERR_SESSION_DISPOSED);
        tracing::debug!(address = %self.inner.address, "fiber stopped");
    }

    /// Stop [`run`](Self::run) and unregister from the router.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Process one inbound item. Handlers are started, not awaited.
    pub fn on_inbound(&self, item: InboundItem) {
        match item {
            InboundItem::Fault { rpc_id, error, .. } => self.inner.sender.fail(rpc_id, error),
            InboundItem::Envelope(envelope) => match envelope.kind {
                MessageKind::Response => {
                    self.inner
                        .sender
                        .resolve(envelope.rpc_id, envelope.opcode, envelope.body)
                }
                MessageKind::Request | MessageKind::Message => self.dispatch(envelope),
            },
        }
    }

    fn dispatch(&self, envelope: ActorEnvelope) {
        let instance_id = envelope.target.instance_id;
        let Some(slot) = self.inner.entities.borrow().slot(instance_id) else {
            self.reply_error(&envelope, error_code::ERR_NOT_FOUND_ACTOR, "actor not found");
            return;
        };

        // Enqueued now so the grant order is the arrival order.
        let wait = match slot.mailbox {
            MailboxKind::Ordered => Some(self.inner.locks.wait(
                CoroutineLockType::Mailbox,
                instance_id,
                self.inner.config.lock_timeout,
            )),
            MailboxKind::UnorderedConcurrent => None,
        };

        let fiber = self.clone();
        self.inner
            .providers
            .task()
            .spawn_task("actor_dispatch", async move {
                let _lock = match wait {
                    Some(wait) => match wait.await {
                        Ok(lock) => Some(lock),
                        Err(e) => {
                            tracing::warn!(
                                actor = %envelope.target,
                                opcode = envelope.opcode,
                                error = %e,
                                "mailbox wait failed"
                            );
                            fiber.reply_error(&envelope, e.error_code(), &e.to_string());
                            return;
                        }
                    },
                    None => None,
                };
                fiber.run_handler(slot, envelope).await;
            });
    }

    async fn run_handler(&self, slot: EntitySlot, mut envelope: ActorEnvelope) {
        let current = self.inner.entities.borrow().slot(envelope.target.instance_id);
        if !current.is_some_and(|current| current.same_entity(&slot)) {
            self.reply_error(&envelope, error_code::ERR_NOT_FOUND_ACTOR, "actor removed");
            return;
        }

        let ctx = ActorContext::new(self.clone(), envelope.target, envelope.from);
        let started = self.inner.handlers.borrow().dispatch(
            slot.type_id,
            envelope.opcode,
            ctx,
            slot.entity,
            envelope.rpc_id,
            std::mem::take(&mut envelope.body),
        );
        let Some(handler) = started else {
            tracing::warn!(
                actor = %envelope.target,
                entity = slot.type_name,
                message = self.inner.registry.name(envelope.opcode),
                "no handler registered"
            );
            self.reply_error(&envelope, error_code::ERR_NO_HANDLER, "no handler");
            return;
        };

        if let Some((opcode, body)) = handler.await
            && envelope.kind == MessageKind::Request
        {
            self.reply(&envelope, opcode, body);
        }
    }

    fn reply(&self, request: &ActorEnvelope, opcode: u16, body: Vec<u8>) {
        let response = ActorEnvelope {
            kind: MessageKind::Response,
            from: request.target,
            target: request.from,
            opcode,
            rpc_id: request.rpc_id,
            body,
        };
        if let Err(e) = self.inner.router.route(response) {
            tracing::warn!(
                to = %request.from,
                rpc_id = request.rpc_id,
                error = %e,
                "reply undeliverable"
            );
        }
    }

    /// Answer a request with an error response; drop a message with a
    /// warning.
    fn reply_error(&self, envelope: &ActorEnvelope, error: i32, message: &str) {
        if envelope.kind != MessageKind::Request {
            tracing::warn!(
                actor = %envelope.target,
                message = self.inner.registry.name(envelope.opcode),
                error,
                "message dropped"
            );
            return;
        }
        match self.inner.registry.error_response(
            &self.inner.codec,
            envelope.opcode,
            envelope.rpc_id,
            error,
            message,
        ) {
            Some(Ok((opcode, body))) => self.reply(envelope, opcode, body),
            Some(Err(e)) => tracing::error!(
                actor = %envelope.target,
                error = %e,
                "error response encoding failed"
            ),
            None => tracing::warn!(
                actor = %envelope.target,
                opcode = envelope.opcode,
                "request opcode not registered, cannot answer"
            ),
        }
    }
}
