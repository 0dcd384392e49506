//! Actor addressing.
//!
//! - [`Address`]: a routing destination, one fiber inside one process.
//! - [`ActorId`]: an address plus the entity's per-fiber instance sequence.
//!
//! # Wire encoding
//!
//! On the inner transport an actor id travels as a single little-endian
//! `u64`:
//!
//! ```text
//!  63                              28 27        18 17            0
//! ┌──────────────────────────────────┬────────────┬───────────────┐
//! │ instance sequence (36 bits)      │ fiber (10) │ process (18)  │
//! └──────────────────────────────────┴────────────┴───────────────┘
//! ```
//!
//! The process field sits in the low bits so a receiving process can rewrite
//! it with a mask, leaving the fiber and sequence untouched.

use std::cell::Cell;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of bits reserved for the process id.
pub const PROCESS_BITS: u32 = 18;
/// Number of bits reserved for the fiber id.
pub const FIBER_BITS: u32 = 10;
/// Number of bits reserved for the instance sequence.
pub const INSTANCE_BITS: u32 = 64 - PROCESS_BITS - FIBER_BITS;

/// Largest encodable process id.
pub const MAX_PROCESS: u32 = (1 << PROCESS_BITS) - 1;
/// Largest encodable fiber id.
pub const MAX_FIBER: u32 = (1 << FIBER_BITS) - 1;
/// Largest encodable instance sequence.
pub const MAX_INSTANCE: u64 = (1 << INSTANCE_BITS) - 1;

const PROCESS_MASK: u64 = MAX_PROCESS as u64;
const FIBER_MASK: u64 = MAX_FIBER as u64;

/// Errors raised when an address does not fit the wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Process id larger than [`MAX_PROCESS`].
    #[error("process id {0} out of range (max {MAX_PROCESS})")]
    ProcessOutOfRange(u32),
    /// Fiber id larger than [`MAX_FIBER`].
    #[error("fiber id {0} out of range (max {MAX_FIBER})")]
    FiberOutOfRange(u32),
    /// Instance sequence larger than [`MAX_INSTANCE`].
    #[error("instance id {0} out of range (max {MAX_INSTANCE})")]
    InstanceOutOfRange(u64),
}

/// A routing destination: one fiber inside one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address {
    /// Process the fiber lives in.
    pub process: u32,
    /// Fiber id, unique within the process.
    pub fiber: u32,
}

impl Address {
    /// Create an address.
    pub const fn new(process: u32, fiber: u32) -> Self {
        Self { process, fiber }
    }

    /// The actor id of the fiber itself (instance 0).
    ///
    /// Used as the reply-to address of calls issued by a fiber.
    pub const fn fiber_actor(self) -> ActorId {
        ActorId {
            address: self,
            instance_id: 0,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process, self.fiber)
    }
}

/// Globally addressable identifier of an entity.
///
/// `instance_id` is handed out by the owning fiber's
/// [`InstanceIdGenerator`]; instance 0 designates the fiber itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ActorId {
    /// Where the entity lives.
    pub address: Address,
    /// Per-fiber instance sequence.
    pub instance_id: u64,
}

impl ActorId {
    /// Create an actor id.
    pub const fn new(address: Address, instance_id: u64) -> Self {
        Self {
            address,
            instance_id,
        }
    }

    /// Process part of the address.
    pub const fn process(&self) -> u32 {
        self.address.process
    }

    /// Fiber part of the address.
    pub const fn fiber(&self) -> u32 {
        self.address.fiber
    }

    /// Whether this id designates a fiber rather than an entity.
    pub const fn is_fiber(&self) -> bool {
        self.instance_id == 0
    }

    /// Same entity, re-homed onto `process`.
    ///
    /// Applied on ingress: ids are process-relative on the wire.
    pub const fn with_process(self, process: u32) -> Self {
        Self {
            address: Address {
                process,
                fiber: self.address.fiber,
            },
            instance_id: self.instance_id,
        }
    }

    /// Pack into the 64-bit wire form.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] when a field does not fit its bit range.
    pub fn to_wire(&self) -> Result<u64, AddressError> {
        if self.address.process > MAX_PROCESS {
            return Err(AddressError::ProcessOutOfRange(self.address.process));
        }
        if self.address.fiber > MAX_FIBER {
            return Err(AddressError::FiberOutOfRange(self.address.fiber));
        }
        if self.instance_id > MAX_INSTANCE {
            return Err(AddressError::InstanceOutOfRange(self.instance_id));
        }
        Ok((self.instance_id << (PROCESS_BITS + FIBER_BITS))
            | ((self.address.fiber as u64) << PROCESS_BITS)
            | self.address.process as u64)
    }

    /// Unpack the 64-bit wire form. Every `u64` is a valid encoding.
    pub const fn from_wire(raw: u64) -> Self {
        Self {
            address: Address {
                process: (raw & PROCESS_MASK) as u32,
                fiber: ((raw >> PROCESS_BITS) & FIBER_MASK) as u32,
            },
            instance_id: raw >> (PROCESS_BITS + FIBER_BITS),
        }
    }

    /// Rewrite the process bits of a wire id without decoding it.
    pub const fn rewrite_wire_process(raw: u64, process: u32) -> u64 {
        (raw & !PROCESS_MASK) | (process as u64 & PROCESS_MASK)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.instance_id)
    }
}

/// Monotonic per-fiber instance id source.
///
/// Starts at 1; 0 is reserved for the fiber itself.
#[derive(Debug)]
pub struct InstanceIdGenerator {
    next: Cell<u64>,
}

impl InstanceIdGenerator {
    /// Create a generator whose first id is 1.
    pub fn new() -> Self {
        Self { next: Cell::new(1) }
    }

    /// Hand out the next instance id.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::InstanceOutOfRange`] once the 36-bit space is
    /// exhausted. Ids are never reused.
    pub fn next_id(&self) -> Result<u64, AddressError> {
        let id = self.next.get();
        if id > MAX_INSTANCE {
            return Err(AddressError::InstanceOutOfRange(id));
        }
        self.next.set(id + 1);
        Ok(id)
    }
}

impl Default for InstanceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_roundtrip() {
        let id = ActorId::new(Address::new(3, 7), 123_456);
        let raw = id.to_wire().expect("fits");
        assert_eq!(ActorId::from_wire(raw), id);
    }

    #[test]
    fn test_process_in_low_bits() {
        let id = ActorId::new(Address::new(5, 1), 9);
        let raw = id.to_wire().expect("fits");
        assert_eq!(raw & PROCESS_MASK, 5);
        assert_eq!(raw >> (PROCESS_BITS + FIBER_BITS), 9);
    }

    #[test]
    fn test_rewrite_keeps_sequence_and_fiber() {
        let id = ActorId::new(Address::new(1, 4), 77);
        let raw = id.to_wire().expect("fits");

        let rewritten = ActorId::from_wire(ActorId::rewrite_wire_process(raw, 2));
        assert_eq!(rewritten.process(), 2);
        assert_eq!(rewritten.fiber(), 4);
        assert_eq!(rewritten.instance_id, 77);
        assert_eq!(rewritten, id.with_process(2));
    }

    #[test]
    fn test_round_trip_between_processes() {
        // Entity lives in process 2; process 1 addresses it, process 2 rewrites
        // on ingress, the reply carries it back to process 1.
        let entity = ActorId::new(Address::new(2, 1), 42);
        let outbound = entity.to_wire().expect("fits");
        let at_b = ActorId::from_wire(ActorId::rewrite_wire_process(outbound, 2));
        assert_eq!(at_b, entity);

        let back = ActorId::from_wire(at_b.to_wire().expect("fits"));
        assert_eq!(back, entity);
    }

    #[test]
    fn test_out_of_range_fields() {
        let id = ActorId::new(Address::new(MAX_PROCESS + 1, 0), 1);
        assert_eq!(
            id.to_wire(),
            Err(AddressError::ProcessOutOfRange(MAX_PROCESS + 1))
        );

        let id = ActorId::new(Address::new(0, MAX_FIBER + 1), 1);
        assert_eq!(id.to_wire(), Err(AddressError::FiberOutOfRange(MAX_FIBER + 1)));

        let id = ActorId::new(Address::new(0, 0), MAX_INSTANCE + 1);
        assert_eq!(
            id.to_wire(),
            Err(AddressError::InstanceOutOfRange(MAX_INSTANCE + 1))
        );
    }

    #[test]
    fn test_generator_is_monotonic() {
        let ids = InstanceIdGenerator::new();
        let a = ids.next_id().expect("id");
        let b = ids.next_id().expect("id");
        assert_eq!(a, 1);
        assert!(b > a);
    }

    #[test]
    fn test_fiber_actor() {
        let fiber = Address::new(1, 3).fiber_actor();
        assert!(fiber.is_fiber());
        assert_eq!(fiber.to_string(), "1:3#0");
    }
}
