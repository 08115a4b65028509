//! Fixed-size wire frame.
//!
//! Every datagram on the mesh is exactly [`FRAME_SIZE`] bytes:
//!
//! ```text
//! [kind:1][sender:8 LE][seq:4 LE][total_packets:1][packet_index:1]
//! [data_len:1][data:230]
//! ```
//!
//! A logical message of up to `230 * 255` bytes is carried as a run of
//! frames sharing one `seq`, with `packet_index` in `[0, total_packets)`.
//! Single-packet messages use `total_packets = 1, packet_index = 0`.

use super::error::ProtocolError;
use super::MessageKind;
use crate::identity::NodeId;

/// Total encoded frame size. The bus filters on this exact length.
pub const FRAME_SIZE: usize = 246;

/// Frame header size (kind + sender + seq + total + index + data_len).
pub const HEADER_SIZE: usize = 16;

/// Payload bytes carried per fragment.
pub const MAX_FRAGMENT_DATA: usize = FRAME_SIZE - HEADER_SIZE;

/// Largest logical payload a fragmented message can carry.
pub const MAX_PAYLOAD: usize = MAX_FRAGMENT_DATA * u8::MAX as usize;

/// One wire frame, decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub sender: NodeId,
    pub seq: u32,
    pub total_packets: u8,
    pub packet_index: u8,
    pub data: Vec<u8>,
}

impl Frame {
    /// Build a single-packet frame. The payload must fit one fragment.
    pub fn single(
        kind: MessageKind,
        sender: NodeId,
        seq: u32,
        data: &[u8],
    ) -> Result<Self, ProtocolError> {
        if data.len() > MAX_FRAGMENT_DATA {
            return Err(ProtocolError::PayloadTooLong {
                max: MAX_FRAGMENT_DATA,
                got: data.len(),
            });
        }
        Ok(Self {
            kind,
            sender,
            seq,
            total_packets: 1,
            packet_index: 0,
            data: data.to_vec(),
        })
    }

    /// Split a logical payload into fragments sharing `seq`.
    ///
    /// Chunks are [`MAX_FRAGMENT_DATA`] bytes except possibly the last.
    /// An empty payload still produces one frame with `data_len = 0`.
    pub fn fragment(
        kind: MessageKind,
        sender: NodeId,
        seq: u32,
        payload: &[u8],
    ) -> Result<Vec<Self>, ProtocolError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLong {
                max: MAX_PAYLOAD,
                got: payload.len(),
            });
        }
        if payload.is_empty() {
            return Ok(vec![Frame::single(kind, sender, seq, &[])?]);
        }

        let total = payload.len().div_ceil(MAX_FRAGMENT_DATA);
        let mut frames = Vec::with_capacity(total);
        for (index, chunk) in payload.chunks(MAX_FRAGMENT_DATA).enumerate() {
            frames.push(Self {
                kind,
                sender,
                seq,
                total_packets: total as u8,
                packet_index: index as u8,
                data: chunk.to_vec(),
            });
        }
        Ok(frames)
    }

    /// Encode as the fixed 246-byte wire representation.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[0] = self.kind.to_byte();
        buf[1..9].copy_from_slice(&self.sender.as_u64().to_le_bytes());
        buf[9..13].copy_from_slice(&self.seq.to_le_bytes());
        buf[13] = self.total_packets;
        buf[14] = self.packet_index;
        buf[15] = self.data.len() as u8;
        buf[HEADER_SIZE..HEADER_SIZE + self.data.len()].copy_from_slice(&self.data);
        buf
    }

    /// Decode a received datagram.
    ///
    /// Validates the exact frame length, the message kind byte, and the
    /// fragment geometry (`packet_index < total_packets`, `total >= 1`,
    /// `data_len <= 230`).
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != FRAME_SIZE {
            return Err(ProtocolError::BadFrameLength {
                expected: FRAME_SIZE,
                got: bytes.len(),
            });
        }

        let kind = MessageKind::from_byte(bytes[0])
            .ok_or(ProtocolError::InvalidMessageKind(bytes[0]))?;

        let sender = NodeId::from_raw(u64::from_le_bytes(
            bytes[1..9]
                .try_into()
                .map_err(|_| ProtocolError::Malformed("bad sender".into()))?,
        ));
        let seq = u32::from_le_bytes(
            bytes[9..13]
                .try_into()
                .map_err(|_| ProtocolError::Malformed("bad seq".into()))?,
        );

        let total_packets = bytes[13];
        let packet_index = bytes[14];
        let data_len = bytes[15] as usize;

        if total_packets == 0 {
            return Err(ProtocolError::Malformed("total_packets is zero".into()));
        }
        if packet_index >= total_packets {
            return Err(ProtocolError::Malformed(format!(
                "packet_index {} out of range for {} packets",
                packet_index, total_packets
            )));
        }
        if data_len > MAX_FRAGMENT_DATA {
            return Err(ProtocolError::Malformed(format!(
                "data_len {} exceeds fragment capacity",
                data_len
            )));
        }

        Ok(Self {
            kind,
            sender,
            seq,
            total_packets,
            packet_index,
            data: bytes[HEADER_SIZE..HEADER_SIZE + data_len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> NodeId {
        NodeId::from_raw(0x0000_aabb_ccdd_eeff)
    }

    #[test]
    fn test_single_encode_decode() {
        let frame = Frame::single(MessageKind::Heartbeat, sender(), 42, b"hi").unwrap();
        let encoded = frame.encode();

        assert_eq!(encoded.len(), FRAME_SIZE);
        assert_eq!(encoded[0], 0); // Heartbeat
        assert_eq!(encoded[15], 2); // data_len

        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.sender, sender());
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.total_packets, 1);
        assert_eq!(decoded.packet_index, 0);
    }

    #[test]
    fn test_single_rejects_oversize() {
        let payload = vec![0u8; MAX_FRAGMENT_DATA + 1];
        let result = Frame::single(MessageKind::SavePreset, sender(), 1, &payload);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLong { .. })));
    }

    #[test]
    fn test_fragment_geometry() {
        // 500 bytes -> 3 fragments of 230 / 230 / 40.
        let payload: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
        let frames = Frame::fragment(MessageKind::SavePreset, sender(), 7, &payload).unwrap();

        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.seq, 7);
            assert_eq!(frame.total_packets, 3);
            assert_eq!(frame.packet_index, i as u8);
        }
        assert_eq!(frames[0].data.len(), 230);
        assert_eq!(frames[1].data.len(), 230);
        assert_eq!(frames[2].data.len(), 40);

        let mut reassembled = Vec::new();
        for frame in &frames {
            reassembled.extend_from_slice(&frame.data);
        }
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_fragment_exact_multiple() {
        let payload = vec![7u8; MAX_FRAGMENT_DATA * 2];
        let frames = Frame::fragment(MessageKind::SavePreset, sender(), 1, &payload).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].data.len(), MAX_FRAGMENT_DATA);
    }

    #[test]
    fn test_fragment_empty_payload() {
        let frames = Frame::fragment(MessageKind::RequestSyncPresets, sender(), 1, &[]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.is_empty());
    }

    #[test]
    fn test_fragment_rejects_oversize() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let result = Frame::fragment(MessageKind::SavePreset, sender(), 1, &payload);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLong { .. })));
    }

    #[test]
    fn test_decode_wrong_length() {
        let result = Frame::decode(&[0u8; 100]);
        assert!(matches!(
            result,
            Err(ProtocolError::BadFrameLength { expected: 246, got: 100 })
        ));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let frame = Frame::single(MessageKind::Heartbeat, sender(), 1, &[]).unwrap();
        let mut encoded = frame.encode();
        encoded[0] = 0xee;
        assert!(matches!(
            Frame::decode(&encoded),
            Err(ProtocolError::InvalidMessageKind(0xee))
        ));
    }

    #[test]
    fn test_decode_bad_geometry() {
        let frame = Frame::single(MessageKind::Heartbeat, sender(), 1, &[]).unwrap();

        // packet_index >= total_packets
        let mut encoded = frame.encode();
        encoded[14] = 1;
        assert!(Frame::decode(&encoded).is_err());

        // zero total_packets
        let mut encoded = frame.encode();
        encoded[13] = 0;
        assert!(Frame::decode(&encoded).is_err());

        // data_len beyond fragment capacity
        let mut encoded = frame.encode();
        encoded[15] = 231;
        assert!(Frame::decode(&encoded).is_err());
    }
}
