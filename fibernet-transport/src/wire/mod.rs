//! Packet framing.
//!
//! Two frame layouts share one length prefix:
//!
//! ```text
//! outer: [len:u16][opcode:u16][body:N]
//! inner: [len:u16][opcode:u16][actor_id:u64][body:N]
//! ```
//!
//! All integers are little-endian. `len` counts every byte after the length
//! field itself and may not exceed [`MAX_PACKET_SIZE`]. Outer frames are
//! used between clients and a front-end; inner frames travel between
//! processes and carry the target actor id.

mod parser;

pub use parser::PacketParser;

use crate::buffer::{BufferError, ChunkBuffer};

/// Size of the length prefix.
pub const PACKET_LENGTH_SIZE: usize = 2;

/// Size of the opcode field.
pub const OPCODE_SIZE: usize = 2;

/// Size of the actor id field on inner frames.
pub const ACTOR_ID_SIZE: usize = 8;

/// Largest value accepted in the length field.
pub const MAX_PACKET_SIZE: usize = 60_000;

/// Which frame layout a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    /// Client-facing connection, `[len][opcode][body]`.
    Outer,
    /// Process-to-process connection, `[len][opcode][actor_id][body]`.
    Inner,
}

impl ServiceType {
    /// Bytes between the length prefix and the body.
    pub const fn header_size(self) -> usize {
        match self {
            ServiceType::Outer => OPCODE_SIZE,
            ServiceType::Inner => OPCODE_SIZE + ACTOR_ID_SIZE,
        }
    }
}

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Length field or encoded frame larger than [`MAX_PACKET_SIZE`].
    #[error("packet too large: {size} bytes (max {MAX_PACKET_SIZE})")]
    PacketTooLarge {
        /// Offending length.
        size: usize,
    },

    /// Length field too small to hold the header.
    #[error("packet too small: length {length}, header needs {header}")]
    PacketTooSmall {
        /// Length read from the wire.
        length: usize,
        /// Minimum header size for the service type.
        header: usize,
    },

    /// A frame passed to [`decode_packet`] does not match its length field.
    #[error("frame length mismatch: header says {declared}, frame has {actual}")]
    LengthMismatch {
        /// Length declared by the prefix.
        declared: usize,
        /// Bytes actually following the prefix.
        actual: usize,
    },

    /// The underlying buffer reported an error.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message opcode.
    pub opcode: u16,
    /// Target actor id in wire form. `None` on outer frames.
    pub actor_id: Option<u64>,
    /// Message body.
    pub body: Vec<u8>,
}

impl Packet {
    /// Split the bytes following the length prefix into header and body.
    pub(crate) fn from_frame(service: ServiceType, mut frame: Vec<u8>) -> Result<Self, WireError> {
        let header = service.header_size();
        if frame.len() < header {
            return Err(WireError::PacketTooSmall {
                length: frame.len(),
                header,
            });
        }

        let opcode = u16::from_le_bytes([frame[0], frame[1]]);
        let actor_id = match service {
            ServiceType::Outer => None,
            ServiceType::Inner => {
                let mut raw = [0u8; ACTOR_ID_SIZE];
                raw.copy_from_slice(&frame[OPCODE_SIZE..header]);
                Some(u64::from_le_bytes(raw))
            }
        };
        let body = frame.split_off(header);

        Ok(Self {
            opcode,
            actor_id,
            body,
        })
    }
}

/// Validate the frame size and build the header bytes (length prefix
/// included) for a packet.
fn frame_header(
    service: ServiceType,
    opcode: u16,
    actor_id: u64,
    body_len: usize,
) -> Result<([u8; PACKET_LENGTH_SIZE + OPCODE_SIZE + ACTOR_ID_SIZE], usize), WireError> {
    let length = service.header_size() + body_len;
    if length > MAX_PACKET_SIZE {
        return Err(WireError::PacketTooLarge { size: length });
    }

    let mut header = [0u8; PACKET_LENGTH_SIZE + OPCODE_SIZE + ACTOR_ID_SIZE];
    // MAX_PACKET_SIZE fits in u16.
    header[0..2].copy_from_slice(&(length as u16).to_le_bytes());
    header[2..4].copy_from_slice(&opcode.to_le_bytes());
    if service == ServiceType::Inner {
        header[4..12].copy_from_slice(&actor_id.to_le_bytes());
    }
    Ok((header, PACKET_LENGTH_SIZE + service.header_size()))
}

/// Encode a frame into a new vector. `actor_id` is ignored for
/// [`ServiceType::Outer`].
///
/// # Errors
///
/// Returns [`WireError::PacketTooLarge`] if the frame would exceed
/// [`MAX_PACKET_SIZE`].
pub fn encode_packet(
    service: ServiceType,
    opcode: u16,
    actor_id: u64,
    body: &[u8],
) -> Result<Vec<u8>, WireError> {
    let (header, header_len) = frame_header(service, opcode, actor_id, body.len())?;
    let mut frame = Vec::with_capacity(header_len + body.len());
    frame.extend_from_slice(&header[..header_len]);
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Encode a frame straight into a [`ChunkBuffer`].
///
/// Nothing is written if the frame is rejected.
///
/// # Errors
///
/// Same as [`encode_packet`].
pub fn encode_into(
    buffer: &mut ChunkBuffer,
    service: ServiceType,
    opcode: u16,
    actor_id: u64,
    body: &[u8],
) -> Result<(), WireError> {
    let (header, header_len) = frame_header(service, opcode, actor_id, body.len())?;
    buffer.write(&header[..header_len]);
    buffer.write(body);
    Ok(())
}

/// Decode one complete frame, length prefix included.
///
/// # Errors
///
/// Returns a [`WireError`] if the frame is truncated, oversized or its
/// length field disagrees with its size.
pub fn decode_packet(service: ServiceType, frame: &[u8]) -> Result<Packet, WireError> {
    if frame.len() < PACKET_LENGTH_SIZE {
        return Err(WireError::PacketTooSmall {
            length: frame.len(),
            header: PACKET_LENGTH_SIZE,
        });
    }
    let declared = u16::from_le_bytes([frame[0], frame[1]]) as usize;
    if declared > MAX_PACKET_SIZE {
        return Err(WireError::PacketTooLarge { size: declared });
    }
    let actual = frame.len() - PACKET_LENGTH_SIZE;
    if declared != actual {
        return Err(WireError::LengthMismatch { declared, actual });
    }
    Packet::from_frame(service, frame[PACKET_LENGTH_SIZE..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_layout() {
        let frame = encode_packet(ServiceType::Outer, 0x0102, 99, b"abc").expect("encode");
        // len = opcode(2) + body(3)
        assert_eq!(frame, vec![5, 0, 0x02, 0x01, b'a', b'b', b'c']);

        let packet = decode_packet(ServiceType::Outer, &frame).expect("decode");
        assert_eq!(packet.opcode, 0x0102);
        assert_eq!(packet.actor_id, None);
        assert_eq!(packet.body, b"abc");
    }

    #[test]
    fn test_inner_layout() {
        let frame = encode_packet(ServiceType::Inner, 7, 0x1122_3344_5566_7788, b"z")
            .expect("encode");
        assert_eq!(frame.len(), 2 + 2 + 8 + 1);
        assert_eq!(&frame[0..2], &11u16.to_le_bytes());
        assert_eq!(&frame[4..12], &0x1122_3344_5566_7788u64.to_le_bytes());

        let packet = decode_packet(ServiceType::Inner, &frame).expect("decode");
        assert_eq!(packet.actor_id, Some(0x1122_3344_5566_7788));
        assert_eq!(packet.body, b"z");
    }

    #[test]
    fn test_max_size_boundary() {
        let body = vec![0u8; MAX_PACKET_SIZE - OPCODE_SIZE];
        assert!(encode_packet(ServiceType::Outer, 1, 0, &body).is_ok());

        let body = vec![0u8; MAX_PACKET_SIZE - OPCODE_SIZE + 1];
        assert_eq!(
            encode_packet(ServiceType::Outer, 1, 0, &body),
            Err(WireError::PacketTooLarge {
                size: MAX_PACKET_SIZE + 1
            })
        );
    }

    #[test]
    fn test_rejected_frame_writes_nothing() {
        let mut buffer = ChunkBuffer::with_chunk_size(16);
        let body = vec![0u8; MAX_PACKET_SIZE];
        assert!(encode_into(&mut buffer, ServiceType::Inner, 1, 0, &body).is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_length_mismatch() {
        let mut frame = encode_packet(ServiceType::Outer, 1, 0, b"abc").expect("encode");
        frame.pop();
        assert_eq!(
            decode_packet(ServiceType::Outer, &frame),
            Err(WireError::LengthMismatch {
                declared: 5,
                actual: 4
            })
        );
    }
}
