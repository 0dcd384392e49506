//! Actor envelopes and their inner-wire form.
//!
//! An envelope is what moves between fibers. Locally it travels through an
//! MPSC queue; across processes it becomes an inner frame whose body is
//! prefixed with the sender's actor id:
//!
//! ```text
//! [len:u16][opcode:u16][target:u64][from:u64][message body]
//! ```

use fibernet_core::{ActorId, AddressError, MessageCodec};
use fibernet_transport::{MessageKind, MessageRegistry, Packet};

use super::error::DispatchError;

const FROM_SIZE: usize = 8;

/// One message on its way to an actor.
///
/// The body is always encoded, even for fibers in the same process, so no
/// application object is ever shared between fibers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorEnvelope {
    /// How the target should treat the message.
    pub kind: MessageKind,
    /// Sender. Responses are routed back here.
    pub from: ActorId,
    /// Recipient.
    pub target: ActorId,
    /// Message opcode.
    pub opcode: u16,
    /// Correlation id for requests and responses, 0 otherwise.
    pub rpc_id: u32,
    /// Encoded message.
    pub body: Vec<u8>,
}

impl ActorEnvelope {
    /// Body of the inner frame: the `from` id followed by the message.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if `from` does not fit the wire encoding.
    pub fn inner_body(&self) -> Result<Vec<u8>, AddressError> {
        let mut body = Vec::with_capacity(FROM_SIZE + self.body.len());
        body.extend_from_slice(&self.from.to_wire()?.to_le_bytes());
        body.extend_from_slice(&self.body);
        Ok(body)
    }

    /// Rebuild an envelope from an inner frame received by `local_process`.
    ///
    /// The target is re-homed onto `local_process`; `kind` and `rpc_id`
    /// come from the opcode table.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Codec`] for a truncated body, an
    /// unregistered opcode or an undecodable correlation id.
    pub fn from_inner_packet<C: MessageCodec>(
        packet: Packet,
        local_process: u32,
        registry: &MessageRegistry<C>,
        codec: &C,
    ) -> Result<Self, DispatchError> {
        let raw_target = packet.actor_id.ok_or_else(|| DispatchError::Codec {
            message: "outer frame on an inner channel".to_string(),
        })?;
        if packet.body.len() < FROM_SIZE {
            return Err(DispatchError::Codec {
                message: format!("inner body too short: {} bytes", packet.body.len()),
            });
        }
        let kind = registry
            .kind(packet.opcode)
            .ok_or_else(|| DispatchError::Codec {
                message: format!("unregistered opcode {}", packet.opcode),
            })?;

        let mut from = [0u8; FROM_SIZE];
        from.copy_from_slice(&packet.body[..FROM_SIZE]);
        let mut body = packet.body;
        let body = body.split_off(FROM_SIZE);

        let rpc_id = match registry.rpc_id(codec, packet.opcode, &body) {
            Some(result) => result?,
            None => 0,
        };

        Ok(Self {
            kind,
            from: ActorId::from_wire(u64::from_le_bytes(from)),
            target: ActorId::from_wire(ActorId::rewrite_wire_process(raw_target, local_process)),
            opcode: packet.opcode,
            rpc_id,
            body,
        })
    }
}

/// Item delivered to a fiber's inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundItem {
    /// A message, request or response.
    Envelope(ActorEnvelope),
    /// A call from this fiber can no longer complete.
    Fault {
        /// The caller (a fiber actor id).
        target: ActorId,
        /// The call's correlation id.
        rpc_id: u32,
        /// Error code to fail the call with.
        error: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibernet_core::{Address, JsonCodec, Message, Request, Response};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Ask {
        rpc_id: u32,
    }
    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Answer {
        rpc_id: u32,
        error: i32,
    }
    impl Message for Ask {
        const OPCODE: u16 = 1;
    }
    impl Request for Ask {
        type Response = Answer;
        fn rpc_id(&self) -> u32 {
            self.rpc_id
        }
        fn set_rpc_id(&mut self, rpc_id: u32) {
            self.rpc_id = rpc_id;
        }
    }
    impl Message for Answer {
        const OPCODE: u16 = 2;
    }
    impl Response for Answer {
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

    #[test]
    fn test_inner_round_trip_rehomes_target() {
        let codec = JsonCodec;
        let mut registry = MessageRegistry::new();
        registry.register_request::<Ask>().expect("register");

        let envelope = ActorEnvelope {
            kind: MessageKind::Request,
            from: ActorId::new(Address::new(1, 2), 5),
            target: ActorId::new(Address::new(7, 3), 9),
            opcode: Ask::OPCODE,
            rpc_id: 44,
            body: codec.encode(&Ask { rpc_id: 44 }).expect("encode"),
        };

        let packet = Packet {
            opcode: envelope.opcode,
            actor_id: Some(envelope.target.to_wire().expect("fits")),
            body: envelope.inner_body().expect("fits"),
        };
        let received =
            ActorEnvelope::from_inner_packet(packet, 2, &registry, &codec).expect("decode");

        assert_eq!(received.kind, MessageKind::Request);
        assert_eq!(received.from, envelope.from);
        assert_eq!(received.target, ActorId::new(Address::new(2, 3), 9));
        assert_eq!(received.rpc_id, 44);
        assert_eq!(received.body, envelope.body);
    }

    #[test]
    fn test_truncated_inner_body() {
        let registry: MessageRegistry<JsonCodec> = MessageRegistry::new();
        let packet = Packet {
            opcode: 1,
            actor_id: Some(0),
            body: vec![1, 2, 3],
        };
        assert!(matches!(
            ActorEnvelope::from_inner_packet(packet, 1, &registry, &JsonCodec),
            Err(DispatchError::Codec { .. })
        ));
    }
}
