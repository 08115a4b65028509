//! Control plane.
//!
//! The surface an HTTP/WS collaborator (or the daemon's own glue)
//! drives. A [`ControlHandle`] sends typed requests into the node's
//! event loop over a channel; the node answers on oneshots. Mutations
//! that imply wire traffic never touch the bus directly — the node
//! enqueues the broadcast on its pacing queue, preserving the
//! single-writer discipline.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::identity::NodeId;
use crate::node::NodeError;
use crate::peer::Peer;

/// Errors returned to control-plane callers.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("node is gone")]
    NodeGone,

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Target of an `assign_group` call.
#[derive(Clone, Copy, Debug)]
pub enum GroupTarget {
    /// This node.
    Local,
    /// A specific node, addressed over the wire.
    Node(NodeId),
}

/// Snapshot of node state for status endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct NodeStatus {
    pub id: String,
    pub device_name: String,
    pub role: String,
    pub master_id: Option<String>,
    pub group: String,
    pub power: bool,
    /// Selected preset name, or base type when no preset is applied.
    pub selected: String,
    pub network_time: u32,
    pub has_synced: bool,
    pub offset_ms: i32,
    pub uptime_ms: u64,
    pub peer_count: usize,
}

/// Requests the node's event loop services.
pub enum ControlRequest {
    Status(oneshot::Sender<NodeStatus>),
    ListPresets(oneshot::Sender<Vec<String>>),
    ListBaseAnimations(oneshot::Sender<Vec<String>>),
    CurrentParams(oneshot::Sender<serde_json::Value>),
    Peers(oneshot::Sender<Vec<Peer>>),
    ExportPresets(oneshot::Sender<serde_json::Value>),
    SetAnimation {
        name: String,
        respond: oneshot::Sender<Result<(), NodeError>>,
    },
    SavePreset {
        name: String,
        base_type: String,
        respond: oneshot::Sender<Result<(), NodeError>>,
    },
    RenamePreset {
        old: String,
        new: String,
        respond: oneshot::Sender<Result<(), NodeError>>,
    },
    DeletePreset {
        name: String,
        respond: oneshot::Sender<Result<(), NodeError>>,
    },
    CheckPresetExists {
        name: String,
        respond: oneshot::Sender<bool>,
    },
    SetPower {
        on: bool,
        respond: oneshot::Sender<()>,
    },
    SetPhase {
        phase: f32,
        respond: oneshot::Sender<()>,
    },
    SetParam {
        name: String,
        value: serde_json::Value,
        respond: oneshot::Sender<Result<(), NodeError>>,
    },
    AssignGroup {
        target: GroupTarget,
        group: String,
        respond: oneshot::Sender<Result<(), NodeError>>,
    },
    PrepareOta {
        respond: oneshot::Sender<()>,
    },
    CheckForUpdates {
        respond: oneshot::Sender<()>,
    },
    Reboot {
        respond: oneshot::Sender<()>,
    },
}

/// Cloneable handle into a running node.
#[derive(Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<ControlRequest>,
}

impl ControlHandle {
    pub(crate) fn new(tx: mpsc::Sender<ControlRequest>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlRequest,
    ) -> Result<T, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .await
            .map_err(|_| ControlError::NodeGone)?;
        rx.await.map_err(|_| ControlError::NodeGone)
    }

    async fn request_result(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), NodeError>>) -> ControlRequest,
    ) -> Result<(), ControlError> {
        self.request(build).await?.map_err(ControlError::from)
    }

    // === Reads ===

    pub async fn status(&self) -> Result<NodeStatus, ControlError> {
        self.request(ControlRequest::Status).await
    }

    pub async fn list_presets(&self) -> Result<Vec<String>, ControlError> {
        self.request(ControlRequest::ListPresets).await
    }

    pub async fn list_base_animations(&self) -> Result<Vec<String>, ControlError> {
        self.request(ControlRequest::ListBaseAnimations).await
    }

    pub async fn current_params(&self) -> Result<serde_json::Value, ControlError> {
        self.request(ControlRequest::CurrentParams).await
    }

    pub async fn peers(&self) -> Result<Vec<Peer>, ControlError> {
        self.request(ControlRequest::Peers).await
    }

    pub async fn export_all_presets(&self) -> Result<serde_json::Value, ControlError> {
        self.request(ControlRequest::ExportPresets).await
    }

    // === Writes ===

    pub async fn set_animation(&self, name: &str) -> Result<(), ControlError> {
        let name = name.to_string();
        self.request_result(|respond| ControlRequest::SetAnimation { name, respond })
            .await
    }

    pub async fn save_preset(&self, name: &str, base_type: &str) -> Result<(), ControlError> {
        let name = name.to_string();
        let base_type = base_type.to_string();
        self.request_result(|respond| ControlRequest::SavePreset {
            name,
            base_type,
            respond,
        })
        .await
    }

    pub async fn rename_preset(&self, old: &str, new: &str) -> Result<(), ControlError> {
        let old = old.to_string();
        let new = new.to_string();
        self.request_result(|respond| ControlRequest::RenamePreset { old, new, respond })
            .await
    }

    pub async fn delete_preset(&self, name: &str) -> Result<(), ControlError> {
        let name = name.to_string();
        self.request_result(|respond| ControlRequest::DeletePreset { name, respond })
            .await
    }

    /// Check whether a preset exists anywhere on the mesh.
    ///
    /// Consults the local store first; otherwise queries the network
    /// and waits up to the query timeout for any positive response.
    /// The only control call that can take up to half a second.
    pub async fn check_preset_exists(&self, name: &str) -> Result<bool, ControlError> {
        let name = name.to_string();
        self.request(|respond| ControlRequest::CheckPresetExists { name, respond })
            .await
    }

    pub async fn set_power(&self, on: bool) -> Result<(), ControlError> {
        self.request(|respond| ControlRequest::SetPower { on, respond })
            .await
    }

    pub async fn set_phase(&self, phase: f32) -> Result<(), ControlError> {
        self.request(|respond| ControlRequest::SetPhase { phase, respond })
            .await
    }

    pub async fn set_param(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), ControlError> {
        let name = name.to_string();
        self.request_result(|respond| ControlRequest::SetParam {
            name,
            value,
            respond,
        })
        .await
    }

    pub async fn assign_group(&self, target: GroupTarget, group: &str) -> Result<(), ControlError> {
        let group = group.to_string();
        self.request_result(|respond| ControlRequest::AssignGroup {
            target,
            group,
            respond,
        })
        .await
    }

    /// Quiesce the mesh role ahead of a firmware upgrade.
    pub async fn prepare_ota(&self) -> Result<(), ControlError> {
        self.request(|respond| ControlRequest::PrepareOta { respond })
            .await
    }

    /// Ask the whole fleet to poll the firmware server.
    pub async fn check_for_updates(&self) -> Result<(), ControlError> {
        self.request(|respond| ControlRequest::CheckForUpdates { respond })
            .await
    }

    /// Stop the node for a reboot; the host process acts on the exit.
    pub async fn reboot(&self) -> Result<(), ControlError> {
        self.request(|respond| ControlRequest::Reboot { respond })
            .await
    }
}
