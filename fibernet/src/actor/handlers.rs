//! Explicit handler registration.
//!
//! Handlers are registered per `(entity type, opcode)`. Registration builds a
//! type-erased closure that decodes the body, downcasts the entity, runs the
//! typed handler and encodes the reply:
//!
//! ```text
//! ActorEnvelope { opcode, body }
//!   ↓
//! HandlerRegistry::dispatch(type_id, opcode, ..)
//!   ↓
//! closure: decode body → handler.handle(ctx, entity, msg) → encode response
//!   ↓
//! Some((response_opcode, bytes))   for requests
//! None                             for messages
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use async_trait::async_trait;

use super::context::ActorContext;
use super::error::{DispatchError, HandlerError};
use fibernet_core::{
    Message, MessageCodec, Providers, Request, Response, error_code, failure_response,
};

/// Handles fire-and-forget messages sent to one entity type.
#[async_trait(?Send)]
pub trait ActorMessageHandler<P: Providers, C: MessageCodec>: 'static {
    /// Entity type the handler serves.
    type Entity: 'static;
    /// Message type the handler accepts.
    type Message: Message;

    /// Handle one message.
    async fn handle(
        &self,
        ctx: &ActorContext<P, C>,
        entity: Rc<Self::Entity>,
        message: Self::Message,
    );
}

/// Handles requests sent to one entity type.
///
/// An `Err` is sent back as a response carrying the error's code and
/// message.
#[async_trait(?Send)]
pub trait ActorRequestHandler<P: Providers, C: MessageCodec>: 'static {
    /// Entity type the handler serves.
    type Entity: 'static;
    /// Request type the handler accepts.
    type Request: Request;

    /// Handle one request.
    async fn handle(
        &self,
        ctx: &ActorContext<P, C>,
        entity: Rc<Self::Entity>,
        request: Self::Request,
    ) -> Result<<Self::Request as Request>::Response, HandlerError>;
}

/// Encoded reply produced by a dispatch: response opcode and body.
pub(crate) type Reply = Option<(u16, Vec<u8>)>;

type DispatchFuture = Pin<Box<dyn Future<Output = Reply>>>;

type ErasedHandler<P, C> =
    Box<dyn Fn(ActorContext<P, C>, Rc<dyn Any>, u32, Vec<u8>) -> DispatchFuture>;

/// Handlers of one fiber, keyed by entity type and opcode.
pub(crate) struct HandlerRegistry<P: Providers, C: MessageCodec> {
    handlers: HashMap<(TypeId, u16), ErasedHandler<P, C>>,
}

impl<P: Providers, C: MessageCodec> HandlerRegistry<P, C> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    fn insert(
        &mut self,
        key: (TypeId, u16),
        entity: &'static str,
        handler: ErasedHandler<P, C>,
    ) -> Result<(), DispatchError> {
        if self.handlers.contains_key(&key) {
            return Err(DispatchError::DuplicateHandler {
                opcode: key.1,
                entity,
            });
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub(crate) fn register_message<H>(&mut self, handler: H, codec: C) -> Result<(), DispatchError>
    where
        H: ActorMessageHandler<P, C>,
    {
        let handler = Rc::new(handler);
        let key = (TypeId::of::<H::Entity>(), H::Message::OPCODE);
        let erased: ErasedHandler<P, C> = Box::new(move |ctx, entity, _rpc_id, body| {
            let handler = handler.clone();
            let codec = codec.clone();
            Box::pin(async move {
                let Ok(entity) = entity.downcast::<H::Entity>() else {
                    tracing::warn!(actor = %ctx.actor_id(), "entity type changed, message dropped");
                    return None;
                };
                match codec.decode::<H::Message>(&body) {
                    Ok(message) => handler.handle(&ctx, entity, message).await,
                    Err(e) => tracing::error!(
                        actor = %ctx.actor_id(),
                        message = H::Message::name(),
                        error = %e,
                        "undecodable message dropped"
                    ),
                }
                None
            })
        });
        self.insert(key, std::any::type_name::<H::Entity>(), erased)
    }

    pub(crate) fn register_request<H>(&mut self, handler: H, codec: C) -> Result<(), DispatchError>
    where
        H: ActorRequestHandler<P, C>,
    {
        let handler = Rc::new(handler);
        let key = (TypeId::of::<H::Entity>(), H::Request::OPCODE);
        let erased: ErasedHandler<P, C> = Box::new(move |ctx, entity, rpc_id, body| {
            let handler = handler.clone();
            let codec = codec.clone();
            Box::pin(async move {
                let decoded = (entity.downcast::<H::Entity>(), codec.decode::<H::Request>(&body));
                let response = match decoded {
                    (Ok(entity), Ok(request)) => match handler.handle(&ctx, entity, request).await {
                        Ok(mut response) => {
                            response.set_rpc_id(rpc_id);
                            response
                        }
                        Err(e) => failure_response(rpc_id, e.code, e.message),
                    },
                    (Err(_), _) => failure_response(
                        rpc_id,
                        error_code::ERR_NOT_FOUND_ACTOR,
                        "entity type changed",
                    ),
                    (_, Err(e)) => {
                        tracing::error!(
                            actor = %ctx.actor_id(),
                            request = H::Request::name(),
                            error = %e,
                            "undecodable request"
                        );
                        failure_response(rpc_id, error_code::ERR_CODEC, e.to_string())
                    }
                };
                encode_response::<C, <H::Request as Request>::Response>(&codec, &response)
            })
        });
        self.insert(key, std::any::type_name::<H::Entity>(), erased)
    }

    /// Start the handler for `(type_id, opcode)`.
    ///
    /// Returns `None` if nothing is registered. The returned future owns
    /// everything it needs, so no borrow of the registry is held while it
    /// runs.
    pub(crate) fn dispatch(
        &self,
        type_id: TypeId,
        opcode: u16,
        ctx: ActorContext<P, C>,
        entity: Rc<dyn Any>,
        rpc_id: u32,
        body: Vec<u8>,
    ) -> Option<DispatchFuture> {
        let handler = self.handlers.get(&(type_id, opcode))?;
        Some(handler(ctx, entity, rpc_id, body))
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }
}

fn encode_response<C: MessageCodec, R: Response>(codec: &C, response: &R) -> Reply {
    match codec.encode(response) {
        Ok(body) => Some((R::OPCODE, body)),
        Err(e) => {
            tracing::error!(response = R::name(), error = %e, "response encoding failed");
            None
        }
    }
}
