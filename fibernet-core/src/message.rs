//! Message contracts.
//!
//! Every message type declares its opcode statically; requests additionally
//! declare their response type. Handler tables are built from these
//! associated items by explicit registration calls.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error_code;

/// A message that can travel in a packet body.
pub trait Message: Serialize + DeserializeOwned + 'static {
    /// Wire opcode, unique per message type.
    const OPCODE: u16;

    /// Human readable name used in logs.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A message expecting exactly one response.
pub trait Request: Message {
    /// The response type this request resolves to.
    type Response: Response;

    /// Correlation id stamped by the sender.
    fn rpc_id(&self) -> u32;

    /// Stamp the correlation id.
    fn set_rpc_id(&mut self, rpc_id: u32);
}

/// Response to a [`Request`]. Carries an application error code.
///
/// `Default` lets the framework synthesize responses locally (cancellation,
/// actor not found).
pub trait Response: Message + Default {
    /// Correlation id copied from the request.
    fn rpc_id(&self) -> u32;

    /// Set the correlation id.
    fn set_rpc_id(&mut self, rpc_id: u32);

    /// Application error code, 0 on success.
    fn error(&self) -> i32;

    /// Set the application error code.
    fn set_error(&mut self, error: i32);

    /// Optional human readable error detail.
    fn error_message(&self) -> Option<&str> {
        None
    }

    /// Set the error detail. Types without a message field ignore it.
    fn set_error_message(&mut self, _message: String) {}
}

/// Build a response of type `R` that only carries an error.
pub fn failure_response<R: Response>(rpc_id: u32, error: i32, message: impl Into<String>) -> R {
    let mut response = R::default();
    response.set_rpc_id(rpc_id);
    response.set_error(error);
    response.set_error_message(message.into());
    response
}

/// Whether a response with this error must fail the call instead of being
/// delivered.
pub fn must_raise(error: i32) -> bool {
    error != error_code::ERR_OK
        && error != error_code::ERR_DELIVERED_SENTINEL
        && error <= error_code::ERR_WITHOUT_EXCEPTION
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct EchoResponse {
        rpc_id: u32,
        error: i32,
        message: String,
    }

    impl Message for EchoResponse {
        const OPCODE: u16 = 2;
    }

    impl Response for EchoResponse {
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
        fn error_message(&self) -> Option<&str> {
            Some(&self.message)
        }
        fn set_error_message(&mut self, message: String) {
            self.message = message;
        }
    }

    #[test]
    fn test_failure_response() {
        let response: EchoResponse =
            failure_response(9, error_code::ERR_CANCEL, "cancelled by caller");
        assert_eq!(response.rpc_id(), 9);
        assert_eq!(response.error(), error_code::ERR_CANCEL);
        assert_eq!(response.error_message(), Some("cancelled by caller"));
    }

    #[test]
    fn test_must_raise_boundaries() {
        assert!(!must_raise(error_code::ERR_OK));
        assert!(!must_raise(-1));
        assert!(must_raise(1));
        assert!(must_raise(error_code::ERR_WITHOUT_EXCEPTION));
        assert!(!must_raise(error_code::ERR_WITHOUT_EXCEPTION + 1));
        assert!(!must_raise(error_code::ERR_NOT_FOUND_ACTOR));
        assert!(!must_raise(error_code::ERR_CANCEL));
        assert!(must_raise(error_code::ERR_SESSION_DISPOSED));
        assert!(must_raise(-5));
    }
}
