//! Application error codes carried inside responses.
//!
//! Codes in `1..=ERR_WITHOUT_EXCEPTION` (and negative codes other than
//! [`ERR_DELIVERED_SENTINEL`]) fail the pending call; larger codes are
//! delivered to the caller inside the response.

/// Success.
pub const ERR_OK: i32 = 0;

/// Negative code some front ends use for "delivered with error".
pub const ERR_DELIVERED_SENTINEL: i32 = -1;

/// Upper bound of the raising range.
pub const ERR_WITHOUT_EXCEPTION: i32 = 110_000;

/// The session carrying the call was torn down.
pub const ERR_SESSION_DISPOSED: i32 = 100_101;
/// The call did not complete before its deadline.
pub const ERR_RPC_TIMEOUT: i32 = 100_102;
/// A packet exceeded the maximum frame size.
pub const ERR_PACKET_TOO_LARGE: i32 = 100_103;
/// A coroutine lock waiter hit its deadline.
pub const ERR_LOCK_TIMEOUT: i32 = 100_104;
/// The peer closed or reset the connection.
pub const ERR_PEER_DISCONNECTED: i32 = 100_105;
/// Idle session closed by the idle checker.
pub const ERR_SESSION_IDLE: i32 = 100_106;
/// A body could not be encoded or decoded.
pub const ERR_CODEC: i32 = 100_107;

/// The call was cancelled locally.
pub const ERR_CANCEL: i32 = 110_001;
/// No entity is registered under the target actor id.
pub const ERR_NOT_FOUND_ACTOR: i32 = 110_002;
/// The handler for a request failed.
pub const ERR_HANDLER_FAILED: i32 = 110_003;
/// No handler is registered for the opcode on this entity type.
pub const ERR_NO_HANDLER: i32 = 110_004;
