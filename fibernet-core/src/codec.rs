//! Pluggable body serialization.
//!
//! The transport only frames bytes; turning a message object into the body
//! of a packet (and back) is delegated to a [`MessageCodec`]. Any
//! self-describing format satisfies the contract `T -> bytes`, `bytes -> T`.
//! [`JsonCodec`] is the default and is what the tests use.
//!
//! # Example
//!
//! ```rust
//! use fibernet_core::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Move {
//!     x: i32,
//!     y: i32,
//! }
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&Move { x: 1, y: 0 }).expect("encode");
//! let back: Move = codec.decode(&bytes).expect("decode");
//! assert_eq!(back, Move { x: 1, y: 0 });
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable message serialization format.
///
/// `Clone + 'static` so a codec can be stored inside sessions, fibers and
/// registries. Implementations must be deterministic: lockstep snapshots
/// are hashed from the encoded bytes.
pub trait MessageCodec: Clone + 'static {
    /// Encode a serializable message to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable message.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Human-readable and good enough for tests and tooling; swap in a binary
/// codec for production traffic.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
    struct LoginRequest {
        rpc_id: u32,
        account: String,
    }

    #[test]
    fn test_json_codec_roundtrip() {
        let codec = JsonCodec;
        let msg = LoginRequest {
            rpc_id: 7,
            account: "alice".to_string(),
        };

        let bytes = codec.encode(&msg).expect("encode should succeed");
        let decoded: LoginRequest = codec.decode(&bytes).expect("decode should succeed");

        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_json_codec_is_deterministic() {
        let codec = JsonCodec;
        let msg = LoginRequest {
            rpc_id: 1,
            account: "bob".to_string(),
        };

        let a = codec.encode(&msg).expect("encode");
        let b = codec.encode(&msg.clone()).expect("encode");
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_codec_decode_error() {
        let codec = JsonCodec;

        let result: Result<LoginRequest, CodecError> = codec.decode(b"not valid json {");
        let err = result.expect_err("garbage must not decode");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn test_json_codec_type_mismatch() {
        let codec = JsonCodec;
        let bytes = codec.encode(&42u64).expect("encode");

        let result: Result<LoginRequest, CodecError> = codec.decode(&bytes);
        assert!(result.is_err());
    }
}
