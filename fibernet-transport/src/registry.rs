//! Opcode table.
//!
//! Built once at startup by explicit registration calls. The table lets
//! type-erased layers (sessions, actor dispatch) classify a packet by opcode,
//! pull the correlation id out of a response, and synthesize an error
//! response for a request they cannot serve.

use std::collections::HashMap;

use fibernet_core::{
    CodecError, Message, MessageCodec, Request, Response, failure_response,
};

/// How a message participates in RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Fire-and-forget message.
    Message,
    /// Request expecting a response.
    Request,
    /// Response to a request.
    Response,
}

/// Errors raised while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two different types claim the same opcode.
    #[error("opcode {opcode} registered twice ({existing} and {new})")]
    DuplicateOpcode {
        /// The contested opcode.
        opcode: u16,
        /// Name already registered.
        existing: &'static str,
        /// Name being registered.
        new: &'static str,
    },
}

type ExtractRpcId<C> = fn(&C, &[u8]) -> Result<u32, CodecError>;
type MakeErrorResponse<C> = fn(&C, u32, i32, &str) -> Result<Vec<u8>, CodecError>;

/// Metadata for one registered opcode.
pub struct MessageMeta<C> {
    /// Type name for logs.
    pub name: &'static str,
    /// Kind of message.
    pub kind: MessageKind,
    /// For requests, the opcode of the response type.
    pub response_opcode: Option<u16>,
    extract_rpc_id: Option<ExtractRpcId<C>>,
    error_response: Option<MakeErrorResponse<C>>,
}

impl<C> std::fmt::Debug for MessageMeta<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageMeta")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("response_opcode", &self.response_opcode)
            .finish()
    }
}

/// Registry of known opcodes for one codec.
pub struct MessageRegistry<C: MessageCodec> {
    entries: HashMap<u16, MessageMeta<C>>,
}

impl<C: MessageCodec> MessageRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateOpcode`] if the opcode is taken by
    /// another type.
    pub fn register_message<M: Message>(&mut self) -> Result<(), RegistryError> {
        self.insert(
            M::OPCODE,
            MessageMeta {
                name: M::name(),
                kind: MessageKind::Message,
                response_opcode: None,
                extract_rpc_id: None,
                error_response: None,
            },
        )
    }

    /// Register a request together with its response type.
    ///
    /// # Errors
    ///
    /// Same as [`register_message`](Self::register_message).
    pub fn register_request<R: Request>(&mut self) -> Result<(), RegistryError> {
        self.insert(
            R::OPCODE,
            MessageMeta {
                name: R::name(),
                kind: MessageKind::Request,
                response_opcode: Some(<R::Response as Message>::OPCODE),
                extract_rpc_id: Some(request_rpc_id::<C, R>),
                error_response: Some(make_error_response::<C, R::Response>),
            },
        )?;
        self.register_response::<R::Response>()
    }

    /// Register a response type on its own.
    ///
    /// # Errors
    ///
    /// Same as [`register_message`](Self::register_message).
    pub fn register_response<R: Response>(&mut self) -> Result<(), RegistryError> {
        self.insert(
            R::OPCODE,
            MessageMeta {
                name: R::name(),
                kind: MessageKind::Response,
                response_opcode: None,
                extract_rpc_id: Some(response_rpc_id::<C, R>),
                error_response: None,
            },
        )
    }

    /// Look up an opcode.
    pub fn get(&self, opcode: u16) -> Option<&MessageMeta<C>> {
        self.entries.get(&opcode)
    }

    /// Kind of an opcode, if registered.
    pub fn kind(&self, opcode: u16) -> Option<MessageKind> {
        self.entries.get(&opcode).map(|meta| meta.kind)
    }

    /// Type name of an opcode, or `"<unknown>"`.
    pub fn name(&self, opcode: u16) -> &'static str {
        self.entries.get(&opcode).map_or("<unknown>", |meta| meta.name)
    }

    /// Correlation id of an encoded request or response.
    ///
    /// Returns `None` for unregistered opcodes and plain messages.
    pub fn rpc_id(&self, codec: &C, opcode: u16, body: &[u8]) -> Option<Result<u32, CodecError>> {
        let extract = self.entries.get(&opcode)?.extract_rpc_id?;
        Some(extract(codec, body))
    }

    /// Encode an error response for the request registered at `opcode`.
    ///
    /// Returns `None` if `opcode` is not a registered request. The result
    /// pairs the response opcode with its body.
    pub fn error_response(
        &self,
        codec: &C,
        opcode: u16,
        rpc_id: u32,
        error: i32,
        message: &str,
    ) -> Option<Result<(u16, Vec<u8>), CodecError>> {
        let meta = self.entries.get(&opcode)?;
        let make = meta.error_response?;
        let response_opcode = meta.response_opcode?;
        Some(make(codec, rpc_id, error, message).map(|body| (response_opcode, body)))
    }

    /// Number of registered opcodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, opcode: u16, meta: MessageMeta<C>) -> Result<(), RegistryError> {
        if let Some(existing) = self.entries.get(&opcode) {
            if existing.name == meta.name {
                return Ok(());
            }
            return Err(RegistryError::DuplicateOpcode {
                opcode,
                existing: existing.name,
                new: meta.name,
            });
        }
        self.entries.insert(opcode, meta);
        Ok(())
    }
}

impl<C: MessageCodec> Default for MessageRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn request_rpc_id<C: MessageCodec, R: Request>(codec: &C, body: &[u8]) -> Result<u32, CodecError> {
    codec.decode::<R>(body).map(|request| request.rpc_id())
}

fn response_rpc_id<C: MessageCodec, R: Response>(
    codec: &C,
    body: &[u8],
) -> Result<u32, CodecError> {
    codec.decode::<R>(body).map(|response| response.rpc_id())
}

fn make_error_response<C: MessageCodec, R: Response>(
    codec: &C,
    rpc_id: u32,
    error: i32,
    message: &str,
) -> Result<Vec<u8>, CodecError> {
    let response: R = failure_response(rpc_id, error, message);
    codec.encode(&response)
}
