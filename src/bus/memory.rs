//! In-process broadcast hub.
//!
//! Wires any number of nodes to one shared medium without sockets.
//! Every broadcast is delivered to every attached receiver, including
//! the sender's own (the codec's self-filter is expected to drop it,
//! exactly as on a real broadcast medium). The hub records every send
//! and supports a drop filter, which is how the tests simulate loss.

use std::sync::{Arc, Mutex};

use super::{frame_channel, BusError, FrameRx, FrameTx, RawFrame};
use crate::protocol::FRAME_SIZE;

type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

#[derive(Default)]
struct HubState {
    senders: Vec<FrameTx>,
    log: Vec<Vec<u8>>,
    drop_filter: Option<DropFilter>,
}

/// Shared broadcast medium.
#[derive(Clone, Default)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach one node: returns its bus handle and inbound channel.
    pub fn attach(&self) -> (MemoryBus, FrameRx) {
        let (tx, rx) = frame_channel(256);
        self.state.lock().unwrap().senders.push(tx);
        (
            MemoryBus {
                state: self.state.clone(),
            },
            rx,
        )
    }

    /// Every frame ever offered to the medium, dropped ones included.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().log.clone()
    }

    /// Count sent frames by message-kind byte.
    pub fn sent_count_of_kind(&self, kind_byte: u8) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|f| f.first() == Some(&kind_byte))
            .count()
    }

    /// Install a loss filter: frames for which it returns `true` are
    /// recorded but not delivered.
    pub fn set_drop_filter<F>(&self, filter: F)
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.state.lock().unwrap().drop_filter = Some(Box::new(filter));
    }
}

/// One node's handle onto a [`Hub`].
pub struct MemoryBus {
    state: Arc<Mutex<HubState>>,
}

impl MemoryBus {
    pub fn broadcast(&self, frame: &[u8]) -> Result<(), BusError> {
        if frame.len() > FRAME_SIZE {
            return Err(BusError::FrameTooLarge {
                max: FRAME_SIZE,
                got: frame.len(),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.log.push(frame.to_vec());

        if let Some(filter) = state.drop_filter.as_mut() {
            if filter(frame) {
                return Ok(());
            }
        }

        // The length filter mirrors the real bus: only exact-size
        // datagrams reach a node.
        if frame.len() != FRAME_SIZE {
            return Ok(());
        }

        for sender in &state.senders {
            // A full or closed channel is packet loss, by design.
            let _ = sender.try_send(RawFrame {
                data: frame.to_vec(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_including_sender() {
        let hub = Hub::new();
        let (bus_a, mut rx_a) = hub.attach();
        let (_bus_b, mut rx_b) = hub.attach();

        let frame = vec![3u8; FRAME_SIZE];
        bus_a.broadcast(&frame).unwrap();

        assert_eq!(rx_a.recv().await.unwrap().data, frame);
        assert_eq!(rx_b.recv().await.unwrap().data, frame);
    }

    #[tokio::test]
    async fn test_drop_filter() {
        let hub = Hub::new();
        let (bus, mut rx) = hub.attach();

        let mut dropped = 0;
        hub.set_drop_filter(move |_| {
            dropped += 1;
            dropped <= 1
        });

        let frame = vec![9u8; FRAME_SIZE];
        bus.broadcast(&frame).unwrap();
        bus.broadcast(&frame).unwrap();

        // First was recorded but swallowed, second delivered.
        assert_eq!(hub.sent_frames().len(), 2);
        assert_eq!(rx.recv().await.unwrap().data, frame);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_short_frames_logged_but_not_delivered() {
        let hub = Hub::new();
        let (bus, mut rx) = hub.attach();
        bus.broadcast(&[1u8; 10]).unwrap();
        assert_eq!(hub.sent_frames().len(), 1);
        assert!(rx.try_recv().is_err());
    }
}
