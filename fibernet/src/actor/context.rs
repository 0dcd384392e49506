//! Per-dispatch context handed to handlers.

use std::time::Duration;

use super::error::DispatchError;
use super::fiber::Fiber;
use fibernet_core::{ActorId, Message, MessageCodec, Providers, Request};

/// Where a handler runs and who it is answering.
///
/// Cheap to clone; holds a handle to the owning fiber.
pub struct ActorContext<P: Providers, C: MessageCodec> {
    fiber: Fiber<P, C>,
    actor_id: ActorId,
    from: ActorId,
}

impl<P: Providers, C: MessageCodec> Clone for ActorContext<P, C> {
    fn clone(&self) -> Self {
        Self {
            fiber: self.fiber.clone(),
            actor_id: self.actor_id,
            from: self.from,
        }
    }
}

impl<P: Providers, C: MessageCodec> ActorContext<P, C> {
    pub(crate) fn new(fiber: Fiber<P, C>, actor_id: ActorId, from: ActorId) -> Self {
        Self {
            fiber,
            actor_id,
            from,
        }
    }

    /// Id of the entity handling the message.
    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// Sender of the message.
    pub fn caller(&self) -> ActorId {
        self.from
    }

    /// The fiber the entity lives on.
    pub fn fiber(&self) -> &Fiber<P, C> {
        &self.fiber
    }

    /// Send a message from this fiber.
    ///
    /// # Errors
    ///
    /// See [`ActorSender::send`](super::ActorSender::send).
    pub fn send<M: Message>(&self, target: ActorId, message: &M) -> Result<(), DispatchError> {
        self.fiber.send(target, message)
    }

    /// Call another actor from this fiber.
    ///
    /// # Errors
    ///
    /// See [`ActorSender::call`](super::ActorSender::call).
    pub async fn call<R: Request>(
        &self,
        target: ActorId,
        request: R,
    ) -> Result<R::Response, DispatchError> {
        self.fiber.call(target, request).await
    }

    /// Call with a deadline.
    ///
    /// # Errors
    ///
    /// See [`ActorSender::call_with_timeout`](super::ActorSender::call_with_timeout).
    pub async fn call_with_timeout<R: Request>(
        &self,
        target: ActorId,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response, DispatchError> {
        self.fiber.call_with_timeout(target, request, timeout).await
    }
}
