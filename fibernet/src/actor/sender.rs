//! Outgoing calls of one fiber.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use super::envelope::ActorEnvelope;
use super::error::DispatchError;
use super::router::ProcessRouter;
use fibernet_core::{
    ActorId, Message, MessageCodec, Request, Response, TimeProvider, error_code, must_raise,
};
use fibernet_transport::{MessageKind, RpcError};

type Reply = Result<Vec<u8>, RpcError>;

struct PendingCall {
    name: &'static str,
    response_opcode: u16,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingCalls {
    next_rpc_id: u32,
    calls: HashMap<u32, PendingCall>,
}

/// Removes a call's pending entry unless a reply took it, including when
/// the caller drops the call future.
struct CallGuard<'a> {
    pending: &'a RefCell<PendingCalls>,
    rpc_id: u32,
    armed: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut pending) = self.pending.try_borrow_mut() {
            pending.calls.remove(&self.rpc_id);
        }
    }
}

/// Sends messages and calls on behalf of one fiber.
///
/// Calls are issued from the fiber's own actor id (instance 0), so every
/// response comes back through the fiber's inbound queue and is resolved
/// here by rpc id.
pub struct ActorSender<T: TimeProvider, C: MessageCodec> {
    router: Arc<ProcessRouter>,
    from: ActorId,
    codec: C,
    time: T,
    pending: Rc<RefCell<PendingCalls>>,
}

impl<T: TimeProvider, C: MessageCodec> Clone for ActorSender<T, C> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            from: self.from,
            codec: self.codec.clone(),
            time: self.time.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T: TimeProvider, C: MessageCodec> ActorSender<T, C> {
    pub(crate) fn new(router: Arc<ProcessRouter>, from: ActorId, codec: C, time: T) -> Self {
        Self {
            router,
            from,
            codec,
            time,
            pending: Rc::new(RefCell::new(PendingCalls::default())),
        }
    }

    /// Send a message. No reply is expected.
    ///
    /// # Errors
    ///
    /// A codec error, or the router's error if the target is unreachable.
    pub fn send<M: Message>(&self, target: ActorId, message: &M) -> Result<(), DispatchError> {
        let body = self.codec.encode(message)?;
        self.router.route(ActorEnvelope {
            kind: MessageKind::Message,
            from: self.from,
            target,
            opcode: M::OPCODE,
            rpc_id: 0,
            body,
        })
    }

    /// Send a request and wait for its response.
    ///
    /// A response with an error code that does not need raising is returned
    /// as `Ok`, so `ERR_NOT_FOUND_ACTOR` and friends reach the caller as
    /// data.
    ///
    /// # Errors
    ///
    /// [`RpcError::Remote`] for a raising error code,
    /// [`RpcError::SessionClosed`] when the path to the target failed, or a
    /// routing error if the request could not leave.
    pub async fn call<R: Request>(
        &self,
        target: ActorId,
        request: R,
    ) -> Result<R::Response, DispatchError> {
        self.call_inner(target, request, None).await
    }

    /// Like [`call`](Self::call), failing with [`RpcError::Timeout`] after
    /// `timeout`.
    pub async fn call_with_timeout<R: Request>(
        &self,
        target: ActorId,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response, DispatchError> {
        self.call_inner(target, request, Some(timeout)).await
    }

    async fn call_inner<R: Request>(
        &self,
        target: ActorId,
        mut request: R,
        timeout: Option<Duration>,
    ) -> Result<R::Response, DispatchError> {
        let (rpc_id, reply) = self.register(R::name(), <R::Response as Message>::OPCODE);
        let mut pending = CallGuard {
            pending: &self.pending,
            rpc_id,
            armed: true,
        };
        request.set_rpc_id(rpc_id);

        let body = self.codec.encode(&request)?;
        self.router.route(ActorEnvelope {
            kind: MessageKind::Request,
            from: self.from,
            target,
            opcode: R::OPCODE,
            rpc_id,
            body,
        })?;

        let received = match timeout {
            Some(after) => match self.time.timeout(after, reply).await {
                Ok(received) => received,
                Err(_) => {
                    tracing::warn!(
                        from = %self.from,
                        actor = %target,
                        rpc_id,
                        request = R::name(),
                        ?after,
                        "actor call timed out"
                    );
                    return Err(RpcError::Timeout {
                        name: R::name(),
                        after,
                    }
                    .into());
                }
            },
            None => reply.await,
        };
        // resolve, fail and fail_all take the entry out before replying.
        pending.armed = false;

        let body = match received {
            Ok(result) => result?,
            Err(_) => {
                return Err(RpcError::SessionClosed {
                    error: error_code::ERR_SESSION_DISPOSED,
                }
                .into());
            }
        };
        let response: R::Response = self.codec.decode(&body)?;
        let code = response.error();
        if must_raise(code) {
            return Err(RpcError::Remote {
                code,
                message: response.error_message().unwrap_or_default().to_string(),
            }
            .into());
        }
        Ok(response)
    }

    fn register(
        &self,
        name: &'static str,
        response_opcode: u16,
    ) -> (u32, oneshot::Receiver<Reply>) {
        let mut pending = self.pending.borrow_mut();
        // Skip 0 and any id still in flight after wrap-around.
        let rpc_id = loop {
            pending.next_rpc_id = pending.next_rpc_id.wrapping_add(1);
            let candidate = pending.next_rpc_id;
            if candidate != 0 && !pending.calls.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        pending.calls.insert(
            rpc_id,
            PendingCall {
                name,
                response_opcode,
                reply: tx,
            },
        );
        (rpc_id, rx)
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.borrow().calls.len()
    }

    /// Resolve the call a response belongs to. Unmatched responses are
    /// dropped.
    pub(crate) fn resolve(&self, rpc_id: u32, opcode: u16, body: Vec<u8>) {
        let Some(call) = self.pending.borrow_mut().calls.remove(&rpc_id) else {
            tracing::debug!(
                from = %self.from,
                rpc_id,
                opcode,
                "no pending call for response, dropped"
            );
            return;
        };
        let result = if call.response_opcode == opcode {
            Ok(body)
        } else {
            tracing::warn!(
                rpc_id,
                request = call.name,
                expected = call.response_opcode,
                actual = opcode,
                "response opcode mismatch"
            );
            Err(RpcError::ResponseMismatch {
                expected: call.response_opcode,
                actual: opcode,
            })
        };
        let _ = call.reply.send(result);
    }

    /// Fail one pending call with `error`.
    pub(crate) fn fail(&self, rpc_id: u32, error: i32) {
        if let Some(call) = self.pending.borrow_mut().calls.remove(&rpc_id) {
            tracing::debug!(
                from = %self.from,
                rpc_id,
                request = call.name,
                error,
                "actor call faulted"
            );
            let _ = call.reply.send(Err(RpcError::SessionClosed { error }));
        }
    }

    /// Fail every pending call with `error`.
    pub(crate) fn fail_all(&self, error: i32) {
        let calls: Vec<PendingCall> = self
            .pending
            .borrow_mut()
            .calls
            .drain()
            .map(|(_, call)| call)
            .collect();
        for call in calls {
            let _ = call.reply.send(Err(RpcError::SessionClosed { error }));
        }
    }
}
