//! Mesh node.
//!
//! Top-level structure representing a running controller's coordination
//! plane. The node owns the peer table, the election state machine, the
//! preset store and the replication queues, and runs as a single-owner
//! event loop over three sources: inbound frames from the bus, control
//! requests from the local surface, and a 50 ms timer tick that drives
//! every deadline in the protocol. Nothing in the node blocks; timed
//! states carry explicit deadlines evaluated on the tick.

mod handlers;
mod lifecycle;

use std::net::Ipv4Addr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::animation::{AnimationManager, ParamError};
use crate::bus::{BusHandle, FrameRx};
use crate::clock::{ClockSync, NetworkClock};
use crate::config::{ConfigError, DeviceState, Settings};
use crate::control::{ControlHandle, ControlRequest};
use crate::identity::{NodeId, NodeRole};
use crate::peer::PeerTable;
use crate::protocol::{
    Frame, MessageKind, ProtocolError, ReassemblyBuffer, SavePresetPayload,
    PARAM_REASSEMBLY_TIMEOUT_MS, PRESET_REASSEMBLY_TIMEOUT_MS,
};
use crate::replication::{ManifestQueue, PacingQueue, PullQueue, RequestTracker};
use crate::store::{PresetStore, Storage, StoreError};

/// Idle nodes start an election after this long without a master.
pub const IDLE_TIMEOUT_MS: u64 = 2_000;

/// Window for `Ok` replies after sending `Election`.
pub const ELECTION_OK_WINDOW_MS: u64 = 300;

/// Total wait for a `Coordinator` announcement before restarting.
pub const ELECTION_COORDINATOR_WINDOW_MS: u64 = 800;

/// Master heartbeat period.
pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Master time-sync period.
pub const TIME_SYNC_INTERVAL_MS: u64 = 10_000;

/// Slaves re-elect after this long without a master heartbeat.
pub const SLAVE_TIMEOUT_MS: u64 = 15_000;

/// Peer announcement period.
pub const ANNOUNCE_INTERVAL_MS: u64 = 5_000;

/// Network tick period (~20 Hz).
pub const TICK_MS: u64 = 50;

/// Time allowed for a final broadcast to flush before OTA or reboot.
pub const QUIESCE_FLUSH_MS: u64 = 100;

/// Errors related to node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node already running")]
    AlreadyRunning,

    #[error("unknown animation or preset: {0}")]
    UnknownAnimation(String),

    #[error("group name too long: max {max}, got {got}")]
    GroupTooLong { max: usize, got: usize },

    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why the event loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeExit {
    /// Frame channel closed; the bus went away.
    Shutdown,
    /// A reboot was requested through the control plane.
    Reboot,
}

/// Bully-election bookkeeping while `role == Election`.
#[derive(Clone, Copy, Debug, Default)]
struct ElectionState {
    /// When the `Election` frame actually went out.
    started_ms: u64,
    /// Jittered send deadline, avoids lockstep collisions after
    /// simultaneous boot.
    send_at_ms: u64,
    sent: bool,
    received_ok: bool,
}

/// A `check_exists` caller waiting for the mesh to answer.
struct PendingQuery {
    name: String,
    deadline_ms: u64,
    respond: oneshot::Sender<bool>,
}

/// A running mesh node.
pub struct MeshNode {
    // === Identity ===
    id: NodeId,
    device_name: String,
    advertise_ip: Ipv4Addr,

    // === Role ===
    role: NodeRole,
    master_id: Option<NodeId>,
    group: String,

    // === Timers (local monotonic ms) ===
    last_heartbeat_ms: u64,
    last_announcement_ms: u64,
    last_time_sync_sent_ms: u64,
    last_sync_request_ms: u64,
    election: ElectionState,
    seq: u32,

    // === Subsystems ===
    peers: PeerTable,
    clock: Arc<NetworkClock>,
    clock_sync: ClockSync,
    store: PresetStore,
    storage: Option<Arc<dyn Storage>>,
    animations: Arc<Mutex<AnimationManager>>,
    bus: BusHandle,
    frame_rx: Option<FrameRx>,
    control_tx: mpsc::Sender<ControlRequest>,
    control_rx: Option<mpsc::Receiver<ControlRequest>>,

    // === Replication ===
    outbound: PacingQueue,
    manifest_queue: ManifestQueue,
    pull_queue: PullQueue,
    request_tracker: RequestTracker,
    pending_query: Option<PendingQuery>,
    preset_rx: ReassemblyBuffer,
    param_rx: ReassemblyBuffer,

    // === Lifecycle ===
    ota_halt: Arc<AtomicBool>,
    ota_quiesce_at: Option<u64>,
    reboot_at: Option<u64>,
    exit: Option<NodeExit>,
    ota_check_hook: Option<Box<dyn Fn() + Send>>,
}

impl MeshNode {
    /// Create a node from settings, an optional storage backend, and a
    /// started bus.
    ///
    /// A broken storage backend is not fatal: the node runs without
    /// presets and base animations keep working.
    pub fn new(
        settings: &Settings,
        storage: Option<Arc<dyn Storage>>,
        bus: BusHandle,
        frame_rx: FrameRx,
    ) -> Result<Self, NodeError> {
        let id = match &settings.node.id {
            Some(hex) => NodeId::from_raw(
                u64::from_str_radix(hex, 16)
                    .map_err(|_| NodeError::InvalidNodeId(hex.clone()))?,
            ),
            None => NodeId::from_host(),
        };
        let device_name = settings
            .node
            .device_name
            .clone()
            .unwrap_or_else(|| format!("lume-{:04x}", id.as_u64() & 0xffff));

        let store = match &storage {
            Some(backend) => match PresetStore::mount(backend.clone()) {
                Ok(store) => store,
                Err(e) => {
                    warn!(error = %e, "preset storage unavailable, continuing without presets");
                    PresetStore::disabled()
                }
            },
            None => PresetStore::disabled(),
        };

        // Persisted group wins over the configured initial group once
        // the node has ever saved state.
        let group = match &storage {
            Some(backend) if backend.exists(crate::config::CONFIG_PATH) => {
                DeviceState::load(backend.as_ref()).group
            }
            _ => settings.node.group.clone(),
        };

        let clock = NetworkClock::new();
        let clock_sync = ClockSync::new(clock.clone());
        let (control_tx, control_rx) = mpsc::channel(32);

        Ok(Self {
            id,
            device_name,
            advertise_ip: Ipv4Addr::UNSPECIFIED,
            role: NodeRole::Startup,
            master_id: None,
            group,
            last_heartbeat_ms: 0,
            last_announcement_ms: 0,
            last_time_sync_sent_ms: 0,
            last_sync_request_ms: 0,
            election: ElectionState::default(),
            seq: 0,
            peers: PeerTable::new(),
            clock,
            clock_sync,
            store,
            storage,
            animations: Arc::new(Mutex::new(AnimationManager::with_defaults())),
            bus,
            frame_rx: Some(frame_rx),
            control_tx,
            control_rx: Some(control_rx),
            outbound: PacingQueue::new(),
            manifest_queue: ManifestQueue::new(),
            pull_queue: PullQueue::new(),
            request_tracker: RequestTracker::new(),
            pending_query: None,
            preset_rx: ReassemblyBuffer::new(PRESET_REASSEMBLY_TIMEOUT_MS),
            param_rx: ReassemblyBuffer::new(PARAM_REASSEMBLY_TIMEOUT_MS),
            ota_halt: Arc::new(AtomicBool::new(false)),
            ota_quiesce_at: None,
            reboot_at: None,
            exit: None,
            ota_check_hook: None,
        })
    }

    // === Accessors ===

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role.is_master()
    }

    pub fn master_id(&self) -> Option<NodeId> {
        self.master_id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn clock(&self) -> Arc<NetworkClock> {
        self.clock.clone()
    }

    pub fn animations(&self) -> Arc<Mutex<AnimationManager>> {
        self.animations.clone()
    }

    /// Flag the render scheduler watches to stop producing frames.
    pub fn ota_halt_flag(&self) -> Arc<AtomicBool> {
        self.ota_halt.clone()
    }

    /// Create a control handle into this node.
    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle::new(self.control_tx.clone())
    }

    /// Address advertised in peer announcements.
    pub fn set_advertise_ip(&mut self, ip: Ipv4Addr) {
        self.advertise_ip = ip;
    }

    /// Hook invoked when a `CheckForUpdates` broadcast is received;
    /// wired to the OTA collaborator.
    pub fn set_ota_check_hook(&mut self, hook: impl Fn() + Send + 'static) {
        self.ota_check_hook = Some(Box::new(hook));
    }

    // === Internals shared by handlers and lifecycle ===

    fn now_ms(&self) -> u64 {
        self.clock.local_millis()
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Queue a single-packet broadcast for the next drain.
    fn enqueue_frame(&mut self, kind: MessageKind, payload: &[u8]) {
        let seq = self.next_seq();
        match Frame::single(kind, self.id, seq, payload) {
            Ok(frame) => {
                let now = self.now_ms();
                self.outbound.push_now(now, frame.encode().to_vec());
            }
            Err(e) => warn!(kind = ?kind, error = %e, "payload does not fit a frame"),
        }
    }

    /// Queue a fragmented broadcast, one round, fragments paced apart.
    fn enqueue_fragmented(&mut self, kind: MessageKind, payload: &[u8]) {
        let seq = self.next_seq();
        let frames = match Frame::fragment(kind, self.id, seq, payload) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(kind = ?kind, error = %e, "payload too large to fragment");
                return;
            }
        };
        let now = self.now_ms();
        for (i, frame) in frames.iter().enumerate() {
            self.outbound.push_at(
                now + i as u64 * crate::replication::FRAGMENT_SPACING_MS,
                frame.encode().to_vec(),
            );
        }
    }

    /// Queue the redundant-round broadcast of one stored preset.
    fn enqueue_save_broadcast(&mut self, name: &str) {
        let Ok((base_type, params)) = self.store.get_data(name) else {
            debug!(preset = name, "save broadcast for missing preset");
            return;
        };
        let payload = SavePresetPayload {
            name: name.to_string(),
            base_type,
            params_json: params.to_string(),
        }
        .encode();

        let seq = self.next_seq();
        let frames = match Frame::fragment(MessageKind::SavePreset, self.id, seq, &payload) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(preset = name, error = %e, "preset too large to broadcast");
                return;
            }
        };
        let encoded: Vec<Vec<u8>> = frames.iter().map(|f| f.encode().to_vec()).collect();
        let now = self.now_ms();
        self.outbound.schedule_rounds(now, &encoded);
        debug!(
            preset = name,
            fragments = encoded.len(),
            "queued preset broadcast rounds"
        );
    }

    fn election_jitter() -> u64 {
        rand::thread_rng().gen_range(10..50)
    }

    fn ota_halted(&self) -> bool {
        self.ota_halt.load(std::sync::atomic::Ordering::Relaxed)
    }
}
