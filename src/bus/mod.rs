//! Broadcast datagram bus.
//!
//! The mesh runs over an unreliable broadcast medium: fixed-size
//! datagrams, no acks, no ordering, duplicates possible. The bus does
//! exactly two things: `broadcast` a frame to everyone, and deliver
//! inbound datagrams of the exact framed size into a channel consumed by
//! the node's event loop. All further validation, including dropping the
//! node's own broadcasts, belongs to the codec layer above.
//!
//! Two implementations: [`UdpBus`] for real deployments (UDP broadcast
//! stands in for the link-layer broadcast of the target hardware), and
//! [`MemoryBus`] — an in-process hub wiring several nodes together for
//! multi-node tests.

mod memory;
mod udp;

pub use memory::{Hub, MemoryBus};
pub use udp::{UdpBus, UdpBusConfig};

use thiserror::Error;
use tokio::sync::mpsc;

/// Default UDP port for the mesh.
pub const DEFAULT_PORT: u16 = 47420;

/// Errors related to bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus not started")]
    NotStarted,

    #[error("bus already started")]
    AlreadyStarted,

    #[error("bus start failed: {0}")]
    StartFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("frame too large: max {max}, got {got}")]
    FrameTooLarge { max: usize, got: usize },
}

/// One received datagram, already length-filtered by the bus.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub data: Vec<u8>,
}

/// Sender half of the bus -> node channel.
pub type FrameTx = mpsc::Sender<RawFrame>;
/// Receiver half of the bus -> node channel.
pub type FrameRx = mpsc::Receiver<RawFrame>;

/// Create the bus -> node frame channel.
pub fn frame_channel(capacity: usize) -> (FrameTx, FrameRx) {
    mpsc::channel(capacity)
}

/// Handle over the configured bus implementation.
pub enum BusHandle {
    Udp(UdpBus),
    Memory(MemoryBus),
}

impl BusHandle {
    /// Broadcast one encoded frame to every node on the medium.
    ///
    /// Send failures are transient by contract: callers log and move on,
    /// redundancy at the replication layer covers the loss.
    pub async fn broadcast(&self, frame: &[u8]) -> Result<(), BusError> {
        match self {
            BusHandle::Udp(bus) => bus.broadcast(frame).await,
            BusHandle::Memory(bus) => bus.broadcast(frame),
        }
    }

    /// Stop the bus, releasing sockets and receive tasks.
    pub async fn stop(&mut self) {
        if let BusHandle::Udp(bus) = self {
            bus.stop().await;
        }
    }
}
