//! Incremental frame parser over a [`ChunkBuffer`].

use super::{MAX_PACKET_SIZE, PACKET_LENGTH_SIZE, Packet, ServiceType, WireError};
use crate::buffer::ChunkBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    ReadingLength,
    ReadingBody { length: usize },
}

/// Splits a byte stream into [`Packet`]s.
///
/// Feed bytes into a [`ChunkBuffer`], then call [`parse`](Self::parse)
/// until it returns `false`, taking each ready packet with
/// [`take_packet`](Self::take_packet).
#[derive(Debug)]
pub struct PacketParser {
    service: ServiceType,
    state: ParserState,
    ready: Option<Packet>,
}

impl PacketParser {
    /// Create a parser for the given frame layout.
    pub fn new(service: ServiceType) -> Self {
        Self {
            service,
            state: ParserState::ReadingLength,
            ready: None,
        }
    }

    /// Frame layout this parser expects.
    pub fn service(&self) -> ServiceType {
        self.service
    }

    /// Advance over buffered bytes.
    ///
    /// Returns `true` when a complete packet is ready. While a packet is
    /// ready, further calls return `true` without consuming input.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::PacketTooLarge`] or [`WireError::PacketTooSmall`]
    /// on an invalid length field. The stream is unusable afterwards.
    pub fn parse(&mut self, buffer: &mut ChunkBuffer) -> Result<bool, WireError> {
        if self.ready.is_some() {
            return Ok(true);
        }

        loop {
            match self.state {
                ParserState::ReadingLength => {
                    if buffer.len() < PACKET_LENGTH_SIZE {
                        return Ok(false);
                    }
                    let mut raw = [0u8; PACKET_LENGTH_SIZE];
                    buffer.read(&mut raw)?;
                    let length = u16::from_le_bytes(raw) as usize;

                    if length > MAX_PACKET_SIZE {
                        return Err(WireError::PacketTooLarge { size: length });
                    }
                    let header = self.service.header_size();
                    if length < header {
                        return Err(WireError::PacketTooSmall { length, header });
                    }
                    self.state = ParserState::ReadingBody { length };
                }
                ParserState::ReadingBody { length } => {
                    if buffer.len() < length {
                        return Ok(false);
                    }
                    let frame = buffer.read_vec(length)?;
                    self.state = ParserState::ReadingLength;
                    self.ready = Some(Packet::from_frame(self.service, frame)?);
                    return Ok(true);
                }
            }
        }
    }

    /// Take the ready packet, if any, and clear the ready flag.
    pub fn take_packet(&mut self) -> Option<Packet> {
        self.ready.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DEFAULT_CHUNK_SIZE;
    use crate::wire::encode_packet;

    fn drain(parser: &mut PacketParser, buffer: &mut ChunkBuffer) -> Vec<Packet> {
        let mut packets = Vec::new();
        while parser.parse(buffer).expect("parse") {
            packets.push(parser.take_packet().expect("ready packet"));
        }
        packets
    }

    #[test]
    fn test_byte_by_byte_feed() {
        let frames: Vec<Vec<u8>> = (0..3u16)
            .map(|i| {
                encode_packet(ServiceType::Inner, i, i as u64 * 10, &[i as u8; 5]).expect("encode")
            })
            .collect();
        let stream: Vec<u8> = frames.concat();

        let mut buffer = ChunkBuffer::with_chunk_size(3);
        let mut parser = PacketParser::new(ServiceType::Inner);
        let mut packets = Vec::new();
        for byte in stream {
            buffer.write(&[byte]);
            packets.extend(drain(&mut parser, &mut buffer));
        }

        assert_eq!(packets.len(), 3);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.opcode, i as u16);
            assert_eq!(packet.actor_id, Some(i as u64 * 10));
            assert_eq!(packet.body, vec![i as u8; 5]);
        }
        assert!(buffer.is_empty());
    }

    /// Three packets with empty, short and multi-chunk bodies.
    fn mixed_stream(service: ServiceType) -> Vec<u8> {
        let bodies: [&[u8]; 3] = [&[], b"fiber", &[0xAB; 20]];
        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| {
                encode_packet(service, 300 + i as u16, 0x0102_0304_0506 + i as u64, body)
                    .expect("encode")
            })
            .collect::<Vec<_>>()
            .concat()
    }

    /// Feed `stream` in the pieces delimited by `cuts`, parsing after each
    /// write.
    fn feed_split(
        service: ServiceType,
        chunk_size: usize,
        stream: &[u8],
        cuts: &[usize],
    ) -> Vec<Packet> {
        let mut buffer = ChunkBuffer::with_chunk_size(chunk_size);
        let mut parser = PacketParser::new(service);
        let mut packets = Vec::new();
        let mut start = 0;
        for &end in cuts.iter().chain(std::iter::once(&stream.len())) {
            buffer.write(&stream[start..end]);
            packets.extend(drain(&mut parser, &mut buffer));
            start = end;
        }
        assert!(buffer.is_empty());
        packets
    }

    #[test]
    fn test_single_split_at_every_offset() {
        for service in [ServiceType::Outer, ServiceType::Inner] {
            let stream = mixed_stream(service);
            let whole = feed_split(service, DEFAULT_CHUNK_SIZE, &stream, &[]);
            assert_eq!(whole.len(), 3);
            let opcodes: Vec<u16> = whole.iter().map(|p| p.opcode).collect();
            assert_eq!(opcodes, vec![300, 301, 302]);

            for chunk_size in [1, 2, 7, 16] {
                for cut in 0..=stream.len() {
                    let packets = feed_split(service, chunk_size, &stream, &[cut]);
                    assert_eq!(packets, whole, "{service:?} chunk {chunk_size} cut {cut}");
                }
            }
        }
    }

    #[test]
    fn test_double_split_at_every_offset_pair() {
        let service = ServiceType::Inner;
        let stream = mixed_stream(service);
        let whole = feed_split(service, DEFAULT_CHUNK_SIZE, &stream, &[]);

        for chunk_size in [3, 7] {
            for first in 0..=stream.len() {
                for second in first..=stream.len() {
                    let packets = feed_split(service, chunk_size, &stream, &[first, second]);
                    assert_eq!(packets, whole, "chunk {chunk_size} cuts {first},{second}");
                }
            }
        }
    }

    #[test]
    fn test_split_inside_header_fields() {
        let service = ServiceType::Inner;
        let stream = mixed_stream(service);
        let whole = feed_split(service, DEFAULT_CHUNK_SIZE, &stream, &[]);
        let second_frame = PACKET_LENGTH_SIZE + service.header_size();

        // Inside the length of the first frame, inside its opcode, inside its
        // actor id, and inside the length of the second frame.
        let cuts = [1, PACKET_LENGTH_SIZE + 1, PACKET_LENGTH_SIZE + 5, second_frame + 1];
        // Chunk size 4 puts the cuts on both sides of chunk boundaries.
        let packets = feed_split(service, 4, &stream, &cuts);
        assert_eq!(packets, whole);
        assert_eq!(packets[0].actor_id, Some(0x0102_0304_0506));
        assert_eq!(packets[2].body, vec![0xAB; 20]);
    }

    #[test]
    fn test_parse_is_idempotent_while_ready() {
        let mut buffer = ChunkBuffer::new();
        buffer.write(&encode_packet(ServiceType::Outer, 1, 0, b"a").expect("encode"));
        buffer.write(&encode_packet(ServiceType::Outer, 2, 0, b"b").expect("encode"));

        let mut parser = PacketParser::new(ServiceType::Outer);
        assert!(parser.parse(&mut buffer).expect("parse"));
        let remaining = buffer.len();
        assert!(parser.parse(&mut buffer).expect("parse"));
        assert_eq!(buffer.len(), remaining);

        assert_eq!(parser.take_packet().map(|p| p.opcode), Some(1));
        assert!(parser.parse(&mut buffer).expect("parse"));
        assert_eq!(parser.take_packet().map(|p| p.opcode), Some(2));
        assert!(!parser.parse(&mut buffer).expect("parse"));
        assert_eq!(parser.take_packet(), None);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut buffer = ChunkBuffer::new();
        buffer.write(&((MAX_PACKET_SIZE + 1) as u16).to_le_bytes());

        let mut parser = PacketParser::new(ServiceType::Outer);
        assert_eq!(
            parser.parse(&mut buffer),
            Err(WireError::PacketTooLarge {
                size: MAX_PACKET_SIZE + 1
            })
        );
    }

    #[test]
    fn test_length_smaller_than_header_rejected() {
        let mut buffer = ChunkBuffer::new();
        buffer.write(&4u16.to_le_bytes());

        let mut parser = PacketParser::new(ServiceType::Inner);
        assert_eq!(
            parser.parse(&mut buffer),
            Err(WireError::PacketTooSmall {
                length: 4,
                header: 10
            })
        );
    }

    #[test]
    fn test_empty_body() {
        let mut buffer = ChunkBuffer::new();
        buffer.write(&encode_packet(ServiceType::Outer, 9, 0, &[]).expect("encode"));
        let mut parser = PacketParser::new(ServiceType::Outer);
        let packets = drain(&mut parser, &mut buffer);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].body.is_empty());
    }
}
