//! LUME: synchronized LED mesh
//!
//! The distributed coordination plane for a fleet of LED-strip
//! controllers that render identical or phase-shifted animations in
//! lockstep without a central server. Nodes speak a fixed-size
//! broadcast datagram protocol: a bully election picks a time
//! reference, a smoothed clock offset gives every node a common
//! animation epoch, and presets replicate with redundant broadcasts
//! plus a manifest-driven anti-entropy pull.

pub mod animation;
pub mod bus;
pub mod clock;
pub mod color;
pub mod config;
pub mod control;
pub mod identity;
pub mod node;
pub mod peer;
pub mod pixel;
pub mod protocol;
pub mod replication;
pub mod scheduler;
pub mod store;

// Re-export identity types
pub use identity::{NodeId, NodeRole};

// Re-export config types
pub use config::{BusSettings, ConfigError, DeviceState, NodeSettings, Settings};

// Re-export protocol types
pub use protocol::{Frame, MessageKind, ProtocolError, ReassemblyBuffer, FRAME_SIZE};

// Re-export bus types
pub use bus::{frame_channel, BusError, BusHandle, FrameRx, FrameTx, Hub, MemoryBus, UdpBus, UdpBusConfig};

// Re-export clock types
pub use clock::{ClockSync, NetworkClock};

// Re-export peer types
pub use peer::{Peer, PeerTable};

// Re-export store types
pub use store::{DirStorage, MemStorage, PresetRecord, PresetStore, Storage, StorageError, StoreError};

// Re-export animation types
pub use animation::{
    default_animations, Animation, AnimationManager, ParamError, ParamId, ParamKind, ParamSet,
    ParamValue,
};

// Re-export render types
pub use color::{DynamicPalette, Palette16, Rgb};
pub use pixel::{NullPixelDriver, PixelDriver};
pub use scheduler::RenderScheduler;

// Re-export node types
pub use node::{MeshNode, NodeError, NodeExit};

// Re-export control types
pub use control::{ControlError, ControlHandle, GroupTarget, NodeStatus};
