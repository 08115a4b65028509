//! Event loop, timers, and control-plane servicing.

use std::sync::atomic::Ordering;

use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use super::{
    ElectionState, MeshNode, NodeError, NodeExit, PendingQuery, ANNOUNCE_INTERVAL_MS,
    ELECTION_COORDINATOR_WINDOW_MS, ELECTION_OK_WINDOW_MS, HEARTBEAT_INTERVAL_MS, IDLE_TIMEOUT_MS,
    QUIESCE_FLUSH_MS, SLAVE_TIMEOUT_MS, TICK_MS, TIME_SYNC_INTERVAL_MS,
};
use crate::config::{save_phase, DeviceState};
use crate::control::{ControlRequest, GroupTarget, NodeStatus};
use crate::identity::NodeRole;
use crate::protocol::{
    AnimationState, AssignGroup, MessageKind, NamePayload, PeerAnnouncement, RenamePreset,
    RequestPresetData, SyncParam, SyncPower, TimeSync, MAX_NAME_LEN,
};
use crate::replication::{QUERY_TIMEOUT_MS, SYNC_REQUEST_INTERVAL_MS};

impl MeshNode {
    /// Run the event loop until the bus goes away or a reboot is
    /// requested.
    ///
    /// Three sources drive the node: inbound frames, control requests,
    /// and the periodic tick that evaluates every protocol deadline and
    /// drains the pacing queues.
    pub async fn run(&mut self) -> Result<NodeExit, NodeError> {
        let mut frame_rx = self.frame_rx.take().ok_or(NodeError::AlreadyRunning)?;
        let mut control_rx = self.control_rx.take().ok_or(NodeError::AlreadyRunning)?;

        self.startup();

        let mut tick = interval(Duration::from_millis(TICK_MS));

        let exit = loop {
            tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(frame) => self.handle_raw(&frame.data),
                    None => break NodeExit::Shutdown,
                },
                request = control_rx.recv() => {
                    if let Some(request) = request {
                        self.handle_control(request);
                    }
                }
                _ = tick.tick() => {
                    self.tick().await;
                    if let Some(exit) = self.exit.take() {
                        break exit;
                    }
                }
            }
        };

        info!(?exit, "node event loop stopped");
        Ok(exit)
    }

    /// Boot-time restore: persisted selection and phase, initial role,
    /// first anti-entropy request.
    fn startup(&mut self) {
        let now = self.now_ms();

        info!(
            id = %self.id,
            device = %self.device_name,
            group = %self.group,
            presets = self.store.len(),
            "node starting"
        );

        // Restore phase and the last selected preset.
        if let Some(storage) = self.storage.clone() {
            let phase = crate::config::load_phase(storage.as_ref());
            self.animations.lock().unwrap().set_device_phase(phase);

            let state = DeviceState::load(storage.as_ref());
            if let Some(last) = state.last_preset {
                if self.apply_selection(&last) {
                    info!(selection = %last, "restored last selection");
                }
            }
        }

        // The bus is up before the node is constructed.
        self.role = NodeRole::Idle;
        self.last_heartbeat_ms = now;
        self.last_announcement_ms = now;

        // Pull missing presets from whoever is already on the mesh.
        self.enqueue_frame(MessageKind::RequestSyncPresets, &[]);
        self.last_sync_request_ms = now;
    }

    // === Tick ===

    pub(super) async fn tick(&mut self) {
        let now = self.now_ms();

        match self.role {
            NodeRole::Idle => {
                if now.saturating_sub(self.last_heartbeat_ms) > IDLE_TIMEOUT_MS && !self.ota_halted()
                {
                    info!("no master detected, starting election");
                    self.start_election();
                }
            }
            NodeRole::Election => self.election_tick(now),
            NodeRole::Master => {
                if now.saturating_sub(self.last_heartbeat_ms) >= HEARTBEAT_INTERVAL_MS {
                    self.enqueue_frame(MessageKind::Heartbeat, &[]);
                    self.last_heartbeat_ms = now;
                }
                if now.saturating_sub(self.last_time_sync_sent_ms) >= TIME_SYNC_INTERVAL_MS {
                    self.enqueue_time_sync();
                }
            }
            NodeRole::Slave => {
                if now.saturating_sub(self.last_heartbeat_ms) > SLAVE_TIMEOUT_MS {
                    info!("master heartbeat timeout, starting election");
                    self.start_election();
                }
            }
            NodeRole::Startup => {}
        }

        if now.saturating_sub(self.last_announcement_ms) >= ANNOUNCE_INTERVAL_MS {
            self.announce();
        }

        if now.saturating_sub(self.last_sync_request_ms) >= SYNC_REQUEST_INTERVAL_MS {
            self.enqueue_frame(MessageKind::RequestSyncPresets, &[]);
            self.last_sync_request_ms = now;
        }

        // Anti-entropy queues, paced.
        if let Some(name) = self.manifest_queue.pop_due(now) {
            self.enqueue_frame(MessageKind::PresetManifest, &NamePayload { name }.encode());
        }
        if let Some((target, name)) = self.pull_queue.pop_due(now) {
            debug!(preset = %name, from = %target, "requesting preset data");
            self.enqueue_frame(
                MessageKind::RequestPresetData,
                &RequestPresetData { target, name }.encode(),
            );
        }
        self.request_tracker.expire(now);

        // A query nobody answered resolves to "does not exist".
        if self
            .pending_query
            .as_ref()
            .is_some_and(|q| now >= q.deadline_ms)
        {
            let query = self.pending_query.take().unwrap();
            let _ = query.respond.send(false);
        }

        // Deferred quiesce once the final broadcast has flushed.
        if self.ota_quiesce_at.is_some_and(|at| now >= at) {
            self.ota_quiesce_at = None;
            self.role = NodeRole::Idle;
            self.last_heartbeat_ms = now;
            self.ota_halt.store(true, Ordering::Relaxed);
            info!("quiesced for OTA");
        }
        if self.reboot_at.is_some_and(|at| now >= at) {
            self.reboot_at = None;
            self.exit = Some(NodeExit::Reboot);
        }

        self.drain_outbound(now).await;
    }

    async fn drain_outbound(&mut self, now: u64) {
        for frame in self.outbound.pop_due(now) {
            if let Err(e) = self.bus.broadcast(&frame).await {
                // Transient by contract; redundancy covers it.
                warn!(error = %e, "broadcast failed");
            }
        }
    }

    // === Election ===

    pub(super) fn start_election(&mut self) {
        let now = self.now_ms();
        self.role = NodeRole::Election;
        self.election = ElectionState {
            started_ms: now,
            send_at_ms: now + Self::election_jitter(),
            sent: false,
            received_ok: false,
        };
    }

    fn election_tick(&mut self, now: u64) {
        if !self.election.sent {
            if now >= self.election.send_at_ms {
                debug!("sending election");
                self.enqueue_frame(MessageKind::Election, &[]);
                self.election.sent = true;
                self.election.started_ms = now;
            }
            return;
        }

        let elapsed = now.saturating_sub(self.election.started_ms);
        if elapsed > ELECTION_OK_WINDOW_MS && !self.election.received_ok {
            self.become_coordinator(now);
        } else if elapsed > ELECTION_COORDINATOR_WINDOW_MS && self.election.received_ok {
            info!("coordinator timeout, restarting election");
            self.start_election();
        }
    }

    fn become_coordinator(&mut self, now: u64) {
        info!(id = %self.id, "becoming master");
        self.role = NodeRole::Master;
        self.master_id = Some(self.id);
        self.last_heartbeat_ms = now;
        self.enqueue_frame(MessageKind::Coordinator, &[]);
        // Give fresh followers a clock sample right away instead of
        // waiting a full sync period.
        self.enqueue_time_sync();
    }

    fn enqueue_time_sync(&mut self) {
        let sync = TimeSync {
            millis: self.clock.local_millis() as u32,
        };
        self.enqueue_frame(MessageKind::TimeSync, &sync.encode());
        self.last_time_sync_sent_ms = self.now_ms();
    }

    fn announce(&mut self) {
        let announcement = PeerAnnouncement {
            ip: self.advertise_ip,
            role: self.role,
            group: self.group.clone(),
            device_name: self.device_name.clone(),
        };
        match announcement.encode() {
            Ok(payload) => self.enqueue_frame(MessageKind::PeerAnnouncement, &payload),
            Err(e) => warn!(error = %e, "announcement does not encode"),
        }
        self.last_announcement_ms = self.now_ms();
    }

    // === Selection & grouping ===

    /// Apply a selection by name: a preset loads its parameters into
    /// the matching base animation; a base type resets to defaults;
    /// anything else is a no-op.
    pub(super) fn apply_selection(&mut self, name: &str) -> bool {
        let applied = if let Ok((base_type, params)) = self.store.get_data(name) {
            self.animations
                .lock()
                .unwrap()
                .select_preset(name, &base_type, &params)
        } else {
            self.animations.lock().unwrap().select_base(name)
        };
        if applied {
            self.persist_device_state(Some(name.to_string()));
        }
        applied
    }

    pub(super) fn set_group(&mut self, group: String) {
        self.group = group;
        let last = self.animations.lock().unwrap().selected_name().to_string();
        self.persist_device_state(Some(last));
        // Make the change visible to the fleet immediately.
        self.announce();
    }

    /// Keep selection tracking consistent across a rename.
    pub(super) fn track_rename(&mut self, old: &str, new: &str) {
        let mut animations = self.animations.lock().unwrap();
        if animations.selected_name() == old {
            animations.rename_selected(old, new);
            drop(animations);
            self.persist_device_state(Some(new.to_string()));
        }
    }

    fn persist_device_state(&self, last_preset: Option<String>) {
        if let Some(storage) = &self.storage {
            DeviceState {
                group: self.group.clone(),
                last_preset,
            }
            .save(storage.as_ref());
        }
    }

    // === Control plane ===

    pub(super) fn handle_control(&mut self, request: ControlRequest) {
        match request {
            ControlRequest::Status(respond) => {
                let _ = respond.send(self.status());
            }
            ControlRequest::ListPresets(respond) => {
                let _ = respond.send(self.store.list());
            }
            ControlRequest::ListBaseAnimations(respond) => {
                let _ = respond.send(self.animations.lock().unwrap().base_names());
            }
            ControlRequest::CurrentParams(respond) => {
                let _ = respond.send(self.animations.lock().unwrap().current_params_json());
            }
            ControlRequest::Peers(respond) => {
                let _ = respond.send(self.peers.snapshot());
            }
            ControlRequest::ExportPresets(respond) => {
                let _ = respond.send(self.store.export_all());
            }
            ControlRequest::SetAnimation { name, respond } => {
                let result = if self.apply_selection(&name) {
                    let state = AnimationState {
                        animation: name,
                        group: self.group.clone(),
                        start_time: self.clock.network_time(),
                    };
                    match state.encode() {
                        Ok(payload) => {
                            self.enqueue_frame(MessageKind::AnimationState, &payload);
                            Ok(())
                        }
                        Err(e) => Err(NodeError::Protocol(e)),
                    }
                } else {
                    Err(NodeError::UnknownAnimation(name))
                };
                let _ = respond.send(result);
            }
            ControlRequest::SavePreset {
                name,
                base_type,
                respond,
            } => {
                let _ = respond.send(self.save_preset(&name, &base_type));
            }
            ControlRequest::RenamePreset { old, new, respond } => {
                let result = self.store.rename(&old, &new).map_err(NodeError::from);
                if result.is_ok() {
                    self.track_rename(&old, &new);
                    self.enqueue_frame(
                        MessageKind::RenamePreset,
                        &RenamePreset { old, new }.encode(),
                    );
                }
                let _ = respond.send(result);
            }
            ControlRequest::DeletePreset { name, respond } => {
                let result = self.store.delete(&name).map_err(NodeError::from);
                if result.is_ok() {
                    self.enqueue_frame(MessageKind::DeletePreset, &NamePayload { name }.encode());
                }
                let _ = respond.send(result);
            }
            ControlRequest::CheckPresetExists { name, respond } => {
                if self.store.exists(&name) {
                    let _ = respond.send(true);
                    return;
                }
                // Single query slot: a newer query supersedes one still
                // in flight.
                if let Some(stale) = self.pending_query.take() {
                    let _ = stale.respond.send(false);
                }
                self.enqueue_frame(
                    MessageKind::QueryPreset,
                    &NamePayload { name: name.clone() }.encode(),
                );
                self.pending_query = Some(PendingQuery {
                    name,
                    deadline_ms: self.now_ms() + QUERY_TIMEOUT_MS,
                    respond,
                });
            }
            ControlRequest::SetPower { on, respond } => {
                self.animations.lock().unwrap().set_power(on);
                if !self.group.is_empty() {
                    let payload = SyncPower {
                        group: self.group.clone(),
                        on,
                    }
                    .encode();
                    self.enqueue_frame(MessageKind::SyncPower, &payload);
                }
                let _ = respond.send(());
            }
            ControlRequest::SetPhase { phase, respond } => {
                self.animations.lock().unwrap().set_device_phase(phase);
                if let Some(storage) = &self.storage {
                    save_phase(storage.as_ref(), phase.clamp(0.0, 1.0));
                }
                let _ = respond.send(());
            }
            ControlRequest::SetParam {
                name,
                value,
                respond,
            } => {
                let result = self
                    .animations
                    .lock()
                    .unwrap()
                    .set_param_json(&name, &value)
                    .map_err(NodeError::from);
                if result.is_ok() && !self.group.is_empty() {
                    let payload = SyncParam {
                        group: self.group.clone(),
                        name,
                        value_json: value.to_string(),
                    }
                    .encode();
                    self.enqueue_fragmented(MessageKind::SyncParam, &payload);
                }
                let _ = respond.send(result);
            }
            ControlRequest::AssignGroup {
                target,
                group,
                respond,
            } => {
                let result = if group.len() > MAX_NAME_LEN {
                    Err(NodeError::GroupTooLong {
                        max: MAX_NAME_LEN,
                        got: group.len(),
                    })
                } else {
                    match target {
                        GroupTarget::Local => {
                            self.set_group(group);
                            Ok(())
                        }
                        GroupTarget::Node(id) if id == self.id => {
                            self.set_group(group);
                            Ok(())
                        }
                        GroupTarget::Node(id) => {
                            let payload = AssignGroup { target: id, group }.encode();
                            match payload {
                                Ok(payload) => {
                                    self.enqueue_frame(MessageKind::AssignGroup, &payload);
                                    Ok(())
                                }
                                Err(e) => Err(NodeError::Protocol(e)),
                            }
                        }
                    }
                };
                let _ = respond.send(result);
            }
            ControlRequest::PrepareOta { respond } => {
                if self.role == NodeRole::Master {
                    info!("master preparing for OTA, broadcasting shutdown");
                    self.enqueue_frame(MessageKind::Shutdown, &[]);
                }
                self.ota_quiesce_at = Some(self.now_ms() + QUIESCE_FLUSH_MS);
                let _ = respond.send(());
            }
            ControlRequest::CheckForUpdates { respond } => {
                self.enqueue_frame(MessageKind::CheckForUpdates, &[]);
                let _ = respond.send(());
            }
            ControlRequest::Reboot { respond } => {
                if self.role == NodeRole::Master {
                    self.enqueue_frame(MessageKind::Shutdown, &[]);
                }
                self.reboot_at = Some(self.now_ms() + QUIESCE_FLUSH_MS);
                let _ = respond.send(());
            }
        }
    }

    fn save_preset(&mut self, name: &str, base_type: &str) -> Result<(), NodeError> {
        let params = self
            .animations
            .lock()
            .unwrap()
            .params_of(base_type)
            .ok_or_else(|| NodeError::UnknownAnimation(base_type.to_string()))?;
        self.store.save_from_data(name, base_type, params)?;
        self.enqueue_save_broadcast(name);
        Ok(())
    }

    fn status(&self) -> NodeStatus {
        let animations = self.animations.lock().unwrap();
        NodeStatus {
            id: self.id.to_string(),
            device_name: self.device_name.clone(),
            role: self.role.to_string(),
            master_id: self.master_id.map(|id| id.to_string()),
            group: self.group.clone(),
            power: animations.power(),
            selected: animations.selected_name().to_string(),
            network_time: self.clock.network_time(),
            has_synced: self.clock.has_synced(),
            offset_ms: self.clock.offset_ms(),
            uptime_ms: self.now_ms(),
            peer_count: self.peers.len(),
        }
    }
}
