//! Session implementation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::config::SessionConfig;
use super::error::{RpcError, RpcResult};
use super::idle::IdleChecker;
use crate::channel::{Channel, ChannelEvent, ChannelEvents};
use crate::registry::{MessageKind, MessageRegistry};
use crate::wire::Packet;
use fibernet_core::{
    Message, MessageCodec, Providers, Request, Response, TaskProvider, TimeProvider, error_code,
    failure_response, must_raise,
};

/// Receives packets that are not responses to this session's calls.
///
/// Called from the session's receive loop; long work should be spawned so
/// the loop keeps reading responses.
pub trait SessionHandler<P: Providers, C: MessageCodec> {
    /// A request or plain message arrived.
    fn on_packet(&self, session: &Session<P, C>, packet: Packet);

    /// The session was disposed with `error`.
    fn on_disposed(&self, _session: &Session<P, C>, _error: i32) {}
}

impl<P, C, F> SessionHandler<P, C> for F
where
    P: Providers,
    C: MessageCodec,
    F: Fn(&Session<P, C>, Packet),
{
    fn on_packet(&self, session: &Session<P, C>, packet: Packet) {
        self(session, packet)
    }
}

/// A pending call.
struct RpcInfo {
    name: &'static str,
    response_opcode: u16,
    reply: oneshot::Sender<RpcResult<Vec<u8>>>,
}

struct SessionState {
    next_rpc_id: u32,
    pending: HashMap<u32, RpcInfo>,
    disposed: Option<i32>,
    last_recv: Duration,
    last_send: Duration,
}

pub(crate) struct SessionInner<P: Providers, C: MessageCodec> {
    id: u64,
    providers: P,
    codec: C,
    registry: Rc<MessageRegistry<C>>,
    channel: Channel,
    state: RefCell<SessionState>,
    shutdown: CancellationToken,
    handler: Rc<dyn SessionHandler<P, C>>,
}

impl<P: Providers, C: MessageCodec> Drop for SessionInner<P, C> {
    fn drop(&mut self) {
        // Pending senders drop with the map; their callers see SessionClosed.
        self.shutdown.cancel();
    }
}

/// RPC endpoint bound to one channel.
///
/// Cheap to clone; clones share the same state. The session lives as long
/// as a handle exists; its background tasks only hold weak references.
pub struct Session<P: Providers, C: MessageCodec> {
    inner: Rc<SessionInner<P, C>>,
}

impl<P: Providers, C: MessageCodec> Clone for Session<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Removes a call's pending entry when the call ends without a reply,
/// including when the caller drops the call future.
struct PendingGuard<'a> {
    state: &'a RefCell<SessionState>,
    rpc_id: u32,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.pending.remove(&self.rpc_id);
        }
    }
}

enum Outcome {
    Reply(Result<RpcResult<Vec<u8>>, oneshot::error::RecvError>),
    Cancelled,
    TimedOut,
}

impl<P: Providers, C: MessageCodec> Session<P, C> {
    /// Wrap `channel` and start the receive loop (and the idle checker if
    /// enabled).
    ///
    /// The channel's event stream must not have been taken.
    pub fn new(
        providers: &P,
        id: u64,
        mut channel: Channel,
        registry: Rc<MessageRegistry<C>>,
        codec: C,
        config: SessionConfig,
        handler: Rc<dyn SessionHandler<P, C>>,
    ) -> Self {
        let events = channel.take_events();
        let now = providers.time().now();
        let inner = Rc::new(SessionInner {
            id,
            providers: providers.clone(),
            codec,
            registry,
            channel,
            state: RefCell::new(SessionState {
                next_rpc_id: 0,
                pending: HashMap::new(),
                disposed: None,
                last_recv: now,
                last_send: now,
            }),
            shutdown: CancellationToken::new(),
            handler,
        });
        let session = Self { inner };

        match events {
            Some(events) => {
                providers.task().spawn_task(
                    "session_receive_loop",
                    receive_loop(session.downgrade(), events, session.shutdown_token()),
                );
            }
            None => {
                tracing::error!(
                    session = id,
                    "channel events already taken, session cannot receive"
                );
            }
        }

        if config.idle_check_enabled() {
            IdleChecker::spawn(&session, config.idle_timeout, config.idle_check_interval);
        }

        tracing::debug!(session = id, "session created");
        session
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner<P, C>> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<SessionInner<P, C>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Session id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Providers the session was created with.
    pub fn providers(&self) -> &P {
        &self.inner.providers
    }

    /// Codec used for bodies.
    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    /// Opcode table.
    pub fn registry(&self) -> &MessageRegistry<C> {
        &self.inner.registry
    }

    /// Underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed.is_some()
    }

    /// Error code the session was disposed with.
    pub fn disposed_error(&self) -> Option<i32> {
        self.inner.state.borrow().disposed
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.state.borrow().pending.len()
    }

    /// Time of the last received packet.
    pub fn last_recv(&self) -> Duration {
        self.inner.state.borrow().last_recv
    }

    /// Time of the last sent packet.
    pub fn last_send(&self) -> Duration {
        self.inner.state.borrow().last_send
    }

    /// Resolves once the session is disposed or dropped.
    pub fn closed(&self) -> impl Future<Output = ()> + 'static {
        self.inner.shutdown.clone().cancelled_owned()
    }

    /// Decode a packet body as `M`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Codec`] if the body does not decode.
    pub fn decode<M: Message>(&self, packet: &Packet) -> RpcResult<M> {
        Ok(self.inner.codec.decode(&packet.body)?)
    }

    /// Send a message without waiting for anything.
    ///
    /// Also used to reply to requests.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::SessionClosed`] after disposal, or the codec or
    /// channel error.
    pub fn send<M: Message>(&self, message: &M) -> RpcResult<()> {
        if let Some(error) = self.disposed_error() {
            return Err(RpcError::SessionClosed { error });
        }
        let body = self.inner.codec.encode(message)?;
        self.inner.channel.send(M::OPCODE, 0, &body)?;
        self.inner.state.borrow_mut().last_send = self.inner.providers.time().now();
        Ok(())
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// [`RpcError::Remote`] for a raising error code,
    /// [`RpcError::SessionClosed`] on teardown, or a send failure.
    pub async fn call<R: Request>(&self, request: R) -> RpcResult<R::Response> {
        self.call_inner(request, None, None).await
    }

    /// Like [`call`](Self::call), but `cancel` ends the wait early with a
    /// locally built response carrying `ERR_CANCEL`.
    ///
    /// Cancelling only releases the local wait; the remote may still run
    /// the request. A late response is dropped.
    pub async fn call_with_cancel<R: Request>(
        &self,
        request: R,
        cancel: &CancellationToken,
    ) -> RpcResult<R::Response> {
        self.call_inner(request, Some(cancel), None).await
    }

    /// Like [`call`](Self::call), but fails with [`RpcError::Timeout`] after
    /// `timeout`.
    pub async fn call_with_timeout<R: Request>(
        &self,
        request: R,
        timeout: Duration,
    ) -> RpcResult<R::Response> {
        self.call_inner(request, None, Some(timeout)).await
    }

    async fn call_inner<R: Request>(
        &self,
        mut request: R,
        cancel: Option<&CancellationToken>,
        timeout: Option<Duration>,
    ) -> RpcResult<R::Response> {
        let (rpc_id, mut reply) =
            self.register_call(R::name(), <R::Response as Message>::OPCODE)?;
        let mut pending = PendingGuard {
            state: &self.inner.state,
            rpc_id,
            armed: true,
        };
        request.set_rpc_id(rpc_id);
        self.send(&request)?;

        let time = self.inner.providers.time().clone();
        let outcome = tokio::select! {
            biased;
            result = &mut reply => Outcome::Reply(result),
            _ = wait_cancelled(cancel) => Outcome::Cancelled,
            _ = wait_deadline(&time, timeout) => Outcome::TimedOut,
        };

        if matches!(outcome, Outcome::Reply(_)) {
            // Already taken out of the map by on_response or dispose.
            pending.armed = false;
        }

        match outcome {
            Outcome::Reply(Ok(Ok(body))) => {
                let response: R::Response = self.inner.codec.decode(&body)?;
                let code = response.error();
                if must_raise(code) {
                    return Err(RpcError::Remote {
                        code,
                        message: response.error_message().unwrap_or_default().to_string(),
                    });
                }
                Ok(response)
            }
            Outcome::Reply(Ok(Err(e))) => Err(e),
            Outcome::Reply(Err(_)) => Err(RpcError::SessionClosed {
                error: self
                    .disposed_error()
                    .unwrap_or(error_code::ERR_SESSION_DISPOSED),
            }),
            Outcome::Cancelled => {
                tracing::debug!(
                    session = self.id(),
                    rpc_id,
                    request = R::name(),
                    "call cancelled"
                );
                Ok(failure_response(rpc_id, error_code::ERR_CANCEL, "call cancelled"))
            }
            Outcome::TimedOut => {
                let after = timeout.unwrap_or_default();
                tracing::warn!(
                    session = self.id(),
                    rpc_id,
                    request = R::name(),
                    ?after,
                    "call timed out"
                );
                Err(RpcError::Timeout {
                    name: R::name(),
                    after,
                })
            }
        }
    }

    fn register_call(
        &self,
        name: &'static str,
        response_opcode: u16,
    ) -> RpcResult<(u32, oneshot::Receiver<RpcResult<Vec<u8>>>)> {
        let mut state = self.inner.state.borrow_mut();
        if let Some(error) = state.disposed {
            return Err(RpcError::SessionClosed { error });
        }

        // Skip 0 and any id still in flight after wrap-around.
        let rpc_id = loop {
            state.next_rpc_id = state.next_rpc_id.wrapping_add(1);
            let candidate = state.next_rpc_id;
            if candidate != 0 && !state.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            rpc_id,
            RpcInfo {
                name,
                response_opcode,
                reply: tx,
            },
        );
        Ok((rpc_id, rx))
    }

    /// Resolve the pending call a response belongs to.
    ///
    /// Responses whose rpc id matches no pending call are dropped.
    pub fn on_response(&self, opcode: u16, body: Vec<u8>) {
        let rpc_id = match self.inner.registry.rpc_id(&self.inner.codec, opcode, &body) {
            Some(Ok(rpc_id)) => rpc_id,
            Some(Err(e)) => {
                tracing::error!(session = self.id(), opcode, error = %e, "undecodable response");
                return;
            }
            None => {
                tracing::warn!(session = self.id(), opcode, "opcode is not a registered response");
                return;
            }
        };

        let Some(info) = self.inner.state.borrow_mut().pending.remove(&rpc_id) else {
            tracing::debug!(
                session = self.id(),
                rpc_id,
                opcode,
                "no pending call for response, dropped"
            );
            return;
        };

        let result = if info.response_opcode == opcode {
            Ok(body)
        } else {
            tracing::warn!(
                session = self.id(),
                rpc_id,
                request = info.name,
                expected = info.response_opcode,
                actual = opcode,
                "response opcode mismatch"
            );
            Err(RpcError::ResponseMismatch {
                expected: info.response_opcode,
                actual: opcode,
            })
        };
        // The caller may have stopped waiting.
        let _ = info.reply.send(result);
    }

    /// Tear the session down. Idempotent.
    ///
    /// Fails every pending call with [`RpcError::SessionClosed`], closes the
    /// channel and stops the background tasks.
    pub fn dispose(&self, error: i32) {
        let pending = {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed.is_some() {
                return;
            }
            state.disposed = Some(error);
            std::mem::take(&mut state.pending)
        };

        tracing::debug!(session = self.id(), error, pending = pending.len(), "session disposed");
        self.inner.channel.close();
        self.inner.shutdown.cancel();

        for (_, info) in pending {
            let _ = info.reply.send(Err(RpcError::SessionClosed { error }));
        }
        self.inner.handler.clone().on_disposed(self, error);
    }

    fn on_packet(&self, packet: Packet) {
        self.inner.state.borrow_mut().last_recv = self.inner.providers.time().now();

        match self.inner.registry.kind(packet.opcode) {
            Some(MessageKind::Response) => self.on_response(packet.opcode, packet.body),
            Some(MessageKind::Request | MessageKind::Message) => {
                self.inner.handler.clone().on_packet(self, packet);
            }
            None => {
                tracing::warn!(
                    session = self.id(),
                    opcode = packet.opcode,
                    "unregistered opcode, dropped"
                );
            }
        }
    }
}

async fn wait_cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline<T: TimeProvider>(time: &T, timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => time.sleep(timeout).await,
        None => std::future::pending().await,
    }
}

async fn receive_loop<P: Providers, C: MessageCodec>(
    session: Weak<SessionInner<P, C>>,
    mut events: ChannelEvents,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            return;
        };
        let Some(session) = Session::upgrade(&session) else {
            return;
        };

        match event {
            ChannelEvent::Packet(packet) => session.on_packet(packet),
            ChannelEvent::Error(error) => {
                tracing::debug!(session = session.id(), %error, "channel error");
                session.dispose(error.error_code());
                return;
            }
        }
    }
}
