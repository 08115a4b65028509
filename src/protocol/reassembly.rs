//! Fragment reassembly.
//!
//! One long-lived [`ReassemblyBuffer`] exists per logical payload class
//! (preset transfers, parameter sync). The buffer tracks exactly one
//! in-flight sequence: a fragment carrying a different `seq`, or arriving
//! after the class timeout, resets the buffer before being accepted.
//! Duplicate fragments are dropped via a per-index bitset, which is what
//! makes the redundant-round send policy safe.

use super::frame::{Frame, MAX_FRAGMENT_DATA};
use tracing::debug;

/// Reassembly state for one payload class.
pub struct ReassemblyBuffer {
    timeout_ms: u64,
    active: bool,
    seq: u32,
    total_packets: u8,
    received_packets: u8,
    received_flags: [u8; 32],
    buf: Vec<u8>,
    /// Exact logical length, known once the last fragment arrives.
    final_len: Option<usize>,
    last_packet_ms: u64,
}

impl ReassemblyBuffer {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            active: false,
            seq: 0,
            total_packets: 0,
            received_packets: 0,
            received_flags: [0; 32],
            buf: Vec::new(),
            final_len: None,
            last_packet_ms: 0,
        }
    }

    /// Number of fragments received for the in-flight sequence.
    pub fn received_packets(&self) -> u8 {
        self.received_packets
    }

    /// Whether a sequence is currently being assembled.
    pub fn in_flight(&self) -> bool {
        self.active
    }

    /// Feed one fragment. Returns the assembled payload when the final
    /// fragment of the sequence lands; `None` otherwise (including
    /// duplicates and out-of-bounds fragments, which are dropped).
    pub fn accept(&mut self, frame: &Frame, now_ms: u64) -> Option<Vec<u8>> {
        let stale = self.active && now_ms.saturating_sub(self.last_packet_ms) > self.timeout_ms;
        if !self.active || frame.seq != self.seq || stale {
            self.reset_for(frame);
        }

        let index = frame.packet_index as usize;
        if self.flag(index) {
            // Redundant round or duplicated datagram.
            return None;
        }

        let offset = index * MAX_FRAGMENT_DATA;
        if offset + frame.data.len() > self.buf.len() {
            debug!(
                seq = frame.seq,
                index = frame.packet_index,
                "fragment overruns reassembly buffer, dropping"
            );
            return None;
        }

        self.buf[offset..offset + frame.data.len()].copy_from_slice(&frame.data);
        self.set_flag(index);
        self.received_packets += 1;
        self.last_packet_ms = now_ms;

        if frame.packet_index == self.total_packets - 1 {
            self.final_len =
                Some((self.total_packets as usize - 1) * MAX_FRAGMENT_DATA + frame.data.len());
        }

        if self.received_packets == self.total_packets {
            let len = self.final_len.unwrap_or(self.buf.len());
            let mut payload = std::mem::take(&mut self.buf);
            payload.truncate(len);
            self.active = false;
            Some(payload)
        } else {
            None
        }
    }

    fn reset_for(&mut self, frame: &Frame) {
        self.active = true;
        self.seq = frame.seq;
        self.total_packets = frame.total_packets;
        self.received_packets = 0;
        self.received_flags = [0; 32];
        self.buf = vec![0u8; frame.total_packets as usize * MAX_FRAGMENT_DATA];
        self.final_len = None;
        self.last_packet_ms = 0;
    }

    fn flag(&self, index: usize) -> bool {
        self.received_flags[index / 8] & (1 << (index % 8)) != 0
    }

    fn set_flag(&mut self, index: usize) {
        self.received_flags[index / 8] |= 1 << (index % 8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeId;
    use crate::protocol::MessageKind;

    fn frames_for(payload: &[u8], seq: u32) -> Vec<Frame> {
        Frame::fragment(MessageKind::SavePreset, NodeId::from_raw(1), seq, payload).unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_in_order_reassembly() {
        let data = payload(700);
        let frames = frames_for(&data, 5);
        let mut buf = ReassemblyBuffer::new(5_000);

        for frame in &frames[..frames.len() - 1] {
            assert!(buf.accept(frame, 0).is_none());
        }
        let out = buf.accept(frames.last().unwrap(), 0).unwrap();
        assert_eq!(out, data);
        assert!(!buf.in_flight());
    }

    #[test]
    fn test_permuted_with_duplicates() {
        // Arbitrary permutation with one duplicate per fragment still
        // reconstructs the payload exactly.
        let data = payload(1000);
        let frames = frames_for(&data, 9);
        let mut buf = ReassemblyBuffer::new(5_000);

        let order = [3usize, 0, 3, 4, 1, 0, 1, 4, 2, 2];
        let mut out = None;
        for &i in &order {
            if let Some(done) = buf.accept(&frames[i], 0) {
                assert!(out.is_none(), "completed more than once");
                out = Some(done);
            }
        }
        assert_eq!(out.unwrap(), data);
    }

    #[test]
    fn test_dropped_fragment_never_completes() {
        let data = payload(600);
        let frames = frames_for(&data, 2);
        let mut buf = ReassemblyBuffer::new(5_000);

        // Deliver everything except fragment 1, twice over.
        for _ in 0..2 {
            for (i, frame) in frames.iter().enumerate() {
                if i != 1 {
                    assert!(buf.accept(frame, 0).is_none());
                }
            }
        }
        assert!(buf.received_packets() < frames.len() as u8);
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let data = payload(300);
        let frames = frames_for(&data, 3);
        let mut buf = ReassemblyBuffer::new(5_000);

        // Deliver fragment 0 five times; count must not advance.
        for _ in 0..5 {
            buf.accept(&frames[0], 0);
        }
        assert_eq!(buf.received_packets(), 1);

        let out = buf.accept(&frames[1], 0).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_new_seq_resets() {
        let first = frames_for(&payload(500), 1);
        let second_data = payload(280);
        let second = frames_for(&second_data, 2);
        let mut buf = ReassemblyBuffer::new(5_000);

        buf.accept(&first[0], 0);
        buf.accept(&first[1], 0);

        // A different seq abandons the half-built payload.
        assert!(buf.accept(&second[0], 10).is_none());
        assert_eq!(buf.received_packets(), 1);
        let out = buf.accept(&second[1], 20).unwrap();
        assert_eq!(out, second_data);
    }

    #[test]
    fn test_stale_buffer_resets_on_same_seq() {
        let data = payload(500);
        let frames = frames_for(&data, 4);
        let mut buf = ReassemblyBuffer::new(100);

        buf.accept(&frames[0], 0);
        // Past the class timeout the same seq starts over.
        assert!(buf.accept(&frames[1], 500).is_none());
        assert_eq!(buf.received_packets(), 1);
        buf.accept(&frames[0], 510);
        assert_eq!(buf.received_packets(), 2);
        let out = buf.accept(&frames[2], 520).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_completed_transfer_can_repeat() {
        // A redundant round after completion re-assembles from scratch.
        let data = payload(100);
        let frames = frames_for(&data, 6);
        let mut buf = ReassemblyBuffer::new(5_000);

        assert_eq!(buf.accept(&frames[0], 0).unwrap(), data);
        assert_eq!(buf.accept(&frames[0], 30).unwrap(), data);
    }

    #[test]
    fn test_overrun_fragment_dropped() {
        // Buffer allocated for a 2-packet transfer; a same-seq fragment
        // claiming a different geometry must not write past it.
        let frames = frames_for(&payload(300), 8);
        let mut buf = ReassemblyBuffer::new(5_000);
        buf.accept(&frames[0], 0);

        let mut forged = frames[1].clone();
        forged.total_packets = 5;
        forged.packet_index = 4;
        forged.data = vec![0u8; MAX_FRAGMENT_DATA];
        assert!(buf.accept(&forged, 0).is_none());
        assert_eq!(buf.received_packets(), 1);
    }
}
