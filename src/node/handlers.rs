//! Inbound frame dispatch and per-kind handlers.
//!
//! Everything here runs on the node's event loop and must not block:
//! handlers mutate state and enqueue replies on the pacing queue; the
//! tick drains them. Malformed traffic is dropped with a one-line log —
//! the medium is lossy by design and surfacing it upward is noise.

use tracing::{debug, info, warn};

use super::MeshNode;
use crate::identity::NodeRole;
use crate::protocol::{
    AnimationState, AssignGroup, Frame, MessageKind, NamePayload, PeerAnnouncement, RenamePreset,
    RequestPresetData, SavePresetPayload, SyncParam, SyncPower, TimeSync,
};

impl MeshNode {
    /// Decode and dispatch one datagram from the bus.
    pub(super) fn handle_raw(&mut self, data: &[u8]) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping malformed frame");
                return;
            }
        };

        // A node never processes its own broadcasts.
        if frame.sender == self.id {
            return;
        }

        let now = self.now_ms();
        self.peers.touch(frame.sender, now);

        match frame.kind {
            MessageKind::Heartbeat => self.handle_heartbeat(&frame),
            MessageKind::Election => self.handle_election(&frame),
            MessageKind::Ok => self.handle_ok(&frame),
            MessageKind::Coordinator => self.handle_coordinator(&frame),
            MessageKind::PeerAnnouncement => self.handle_peer_announcement(&frame),
            MessageKind::Shutdown => self.handle_shutdown(&frame),
            MessageKind::TimeSync => self.handle_time_sync(&frame),
            MessageKind::AnimationState => self.handle_animation_state(&frame),
            MessageKind::QueryPreset => self.handle_query_preset(&frame),
            MessageKind::PresetExistResponse => self.handle_preset_exist_response(&frame),
            MessageKind::SavePreset => self.handle_save_preset(&frame),
            MessageKind::DeletePreset => self.handle_delete_preset(&frame),
            MessageKind::RenamePreset => self.handle_rename_preset(&frame),
            MessageKind::AssignGroup => self.handle_assign_group(&frame),
            MessageKind::SyncParam => self.handle_sync_param(&frame),
            MessageKind::SyncPower => self.handle_sync_power(&frame),
            MessageKind::RequestSyncPresets => self.handle_request_sync_presets(),
            MessageKind::PresetManifest => self.handle_preset_manifest(&frame),
            MessageKind::RequestPresetData => self.handle_request_preset_data(&frame),
            MessageKind::CheckForUpdates => self.handle_check_for_updates(),
            // Pixel mirroring from older firmware; no longer consumed.
            MessageKind::FrameData => {}
        }
    }

    // === Membership & election ===

    fn handle_heartbeat(&mut self, frame: &Frame) {
        let now = self.now_ms();
        let sender = frame.sender;

        match self.role {
            NodeRole::Idle | NodeRole::Slave => match self.master_id {
                None => self.accept_master(sender, now),
                Some(master) if master == sender => {
                    self.last_heartbeat_ms = now;
                    if self.role == NodeRole::Idle {
                        self.accept_master(sender, now);
                    }
                }
                // Split brain seen from below: higher id wins.
                Some(master) if sender > master => {
                    info!(old = %master, new = %sender, "higher-priority master detected, switching");
                    self.accept_master(sender, now);
                }
                _ => {}
            },
            NodeRole::Master => {
                // Another master on the air: higher id survives.
                if sender > self.id {
                    info!(master = %sender, "higher-priority master detected, stepping down");
                    self.accept_master(sender, now);
                }
            }
            NodeRole::Election => {
                // A heartbeat from a higher node is an implicit
                // coordinator declaration; covers a lost Coordinator
                // frame.
                if sender > self.id {
                    self.accept_master(sender, now);
                }
            }
            NodeRole::Startup => {}
        }
    }

    fn accept_master(&mut self, sender: crate::identity::NodeId, now: u64) {
        if self.master_id != Some(sender) || self.role != NodeRole::Slave {
            info!(master = %sender, "following master");
        }
        self.master_id = Some(sender);
        self.last_heartbeat_ms = now;
        self.role = NodeRole::Slave;
    }

    fn handle_election(&mut self, frame: &Frame) {
        // While quiesced for OTA the node must not contend; winning an
        // election mid-upgrade would strand the fleet again.
        if self.ota_halted() {
            return;
        }
        if frame.sender >= self.id {
            // The higher node will win on its own; nothing to defer.
            return;
        }
        debug!(candidate = %frame.sender, "lower-priority election, replying ok");
        self.enqueue_frame(MessageKind::Ok, &[]);

        if self.role != NodeRole::Election && self.role != NodeRole::Master {
            self.start_election();
        }
    }

    fn handle_ok(&mut self, frame: &Frame) {
        // Ok replies are broadcast; only one from a node that outranks
        // us means someone else will take the coordinator role. A
        // lower node's Ok answers some other candidate.
        if self.role == NodeRole::Election && frame.sender > self.id {
            debug!(from = %frame.sender, "ok received, waiting for coordinator");
            self.election.received_ok = true;
        }
    }

    fn handle_coordinator(&mut self, frame: &Frame) {
        if frame.sender >= self.id || self.role == NodeRole::Election {
            info!(master = %frame.sender, "new coordinator");
            self.accept_master(frame.sender, self.now_ms());
        }
    }

    fn handle_shutdown(&mut self, frame: &Frame) {
        if Some(frame.sender) == self.master_id {
            info!(master = %frame.sender, "master shutting down, starting election");
            self.start_election();
        }
    }

    fn handle_peer_announcement(&mut self, frame: &Frame) {
        match PeerAnnouncement::decode(&frame.data) {
            Ok(announcement) => {
                let now = self.now_ms();
                self.peers.apply_announcement(frame.sender, &announcement, now);
            }
            Err(e) => debug!(error = %e, "bad peer announcement"),
        }
    }

    // === Clock ===

    fn handle_time_sync(&mut self, frame: &Frame) {
        // Only the accepted master drives our clock.
        if Some(frame.sender) != self.master_id {
            debug!(sender = %frame.sender, "ignoring time sync from non-master");
            return;
        }
        match TimeSync::decode(&frame.data) {
            Ok(sync) => {
                self.clock_sync.apply_time_sync(sync.millis);
            }
            Err(e) => debug!(error = %e, "bad time sync"),
        }
    }

    // === Command bus ===

    fn handle_animation_state(&mut self, frame: &Frame) {
        let state = match AnimationState::decode(&frame.data) {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "bad animation state");
                return;
            }
        };
        // An empty payload group addresses the whole fleet; otherwise
        // only matching non-empty groups follow.
        let applies =
            state.group.is_empty() || (!self.group.is_empty() && state.group == self.group);
        if !applies {
            return;
        }
        info!(animation = %state.animation, "animation selection from mesh");
        self.apply_selection(&state.animation);
    }

    fn handle_assign_group(&mut self, frame: &Frame) {
        let assign = match AssignGroup::decode(&frame.data) {
            Ok(assign) => assign,
            Err(e) => {
                debug!(error = %e, "bad assign group");
                return;
            }
        };
        if assign.target != self.id {
            return;
        }
        info!(group = %assign.group, "group assigned over mesh");
        self.set_group(assign.group);
    }

    fn handle_sync_param(&mut self, frame: &Frame) {
        let now = self.now_ms();
        let Some(payload) = self.param_rx.accept(frame, now) else {
            return;
        };
        let sync = match SyncParam::decode(&payload) {
            Ok(sync) => sync,
            Err(e) => {
                debug!(error = %e, "bad sync param");
                return;
            }
        };
        if self.group.is_empty() || sync.group != self.group {
            return;
        }
        let value: serde_json::Value = match serde_json::from_str(&sync.value_json) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "sync param value is not json");
                return;
            }
        };
        // Kind mismatches and unknown names are dropped silently; the
        // sender's animation may simply differ from ours.
        if let Err(e) = self
            .animations
            .lock()
            .unwrap()
            .set_param_json(&sync.name, &value)
        {
            debug!(param = %sync.name, error = %e, "sync param not applied");
        }
    }

    fn handle_sync_power(&mut self, frame: &Frame) {
        let sync = match SyncPower::decode(&frame.data) {
            Ok(sync) => sync,
            Err(e) => {
                debug!(error = %e, "bad sync power");
                return;
            }
        };
        if self.group.is_empty() || sync.group != self.group {
            return;
        }
        info!(on = sync.on, "power state from mesh");
        self.animations.lock().unwrap().set_power(sync.on);
    }

    // === Replication ===

    fn handle_query_preset(&mut self, frame: &Frame) {
        let query = match NamePayload::decode(&frame.data) {
            Ok(query) => query,
            Err(e) => {
                debug!(error = %e, "bad preset query");
                return;
            }
        };
        if self.store.exists(&query.name) {
            self.enqueue_frame(
                MessageKind::PresetExistResponse,
                &NamePayload { name: query.name }.encode(),
            );
        }
    }

    fn handle_preset_exist_response(&mut self, frame: &Frame) {
        let response = match NamePayload::decode(&frame.data) {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "bad exist response");
                return;
            }
        };
        // Responses for other names answer someone else's query.
        if self
            .pending_query
            .as_ref()
            .is_some_and(|q| q.name == response.name)
        {
            let query = self.pending_query.take().unwrap();
            let _ = query.respond.send(true);
        }
    }

    fn handle_save_preset(&mut self, frame: &Frame) {
        let now = self.now_ms();
        let Some(payload) = self.preset_rx.accept(frame, now) else {
            return;
        };
        let save = match SavePresetPayload::decode(&payload) {
            Ok(save) => save,
            Err(e) => {
                debug!(error = %e, "bad save preset payload");
                return;
            }
        };
        let params: serde_json::Value = match serde_json::from_str(&save.params_json) {
            Ok(params) => params,
            Err(e) => {
                warn!(preset = %save.name, error = %e, "replicated preset params are not json");
                return;
            }
        };
        // Application failures stay local; no negative acks on the
        // wire.
        match self
            .store
            .save_from_data(&save.name, &save.base_type, params)
        {
            Ok(()) => info!(preset = %save.name, base = %save.base_type, "preset replicated"),
            Err(e) => warn!(preset = %save.name, error = %e, "failed to store replicated preset"),
        }
    }

    fn handle_delete_preset(&mut self, frame: &Frame) {
        let del = match NamePayload::decode(&frame.data) {
            Ok(del) => del,
            Err(e) => {
                debug!(error = %e, "bad delete preset");
                return;
            }
        };
        match self.store.delete(&del.name) {
            Ok(()) => info!(preset = %del.name, "preset deleted over mesh"),
            Err(e) => debug!(preset = %del.name, error = %e, "delete not applied"),
        }
    }

    fn handle_rename_preset(&mut self, frame: &Frame) {
        let rename = match RenamePreset::decode(&frame.data) {
            Ok(rename) => rename,
            Err(e) => {
                debug!(error = %e, "bad rename preset");
                return;
            }
        };
        match self.store.rename(&rename.old, &rename.new) {
            Ok(()) => {
                info!(old = %rename.old, new = %rename.new, "preset renamed over mesh");
                self.track_rename(&rename.old, &rename.new);
            }
            Err(e) => debug!(old = %rename.old, error = %e, "rename not applied"),
        }
    }

    fn handle_request_sync_presets(&mut self) {
        let names = self.store.list();
        if !names.is_empty() {
            debug!(count = names.len(), "scheduling preset manifest");
            self.manifest_queue.schedule(names);
        }
    }

    fn handle_preset_manifest(&mut self, frame: &Frame) {
        let manifest = match NamePayload::decode(&frame.data) {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!(error = %e, "bad preset manifest");
                return;
            }
        };
        let now = self.now_ms();
        if self.store.exists(&manifest.name)
            || self.request_tracker.recently_requested(&manifest.name, now)
        {
            return;
        }
        debug!(preset = %manifest.name, from = %frame.sender, "missing preset, queueing pull");
        self.request_tracker.mark(&manifest.name, now);
        self.pull_queue.push(frame.sender, manifest.name);
    }

    fn handle_request_preset_data(&mut self, frame: &Frame) {
        let request = match RequestPresetData::decode(&frame.data) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "bad preset data request");
                return;
            }
        };
        // Only the addressed node answers.
        if request.target != self.id {
            return;
        }
        if self.store.exists(&request.name) {
            info!(preset = %request.name, to = %frame.sender, "answering preset pull");
            self.enqueue_save_broadcast(&request.name);
        }
    }

    // === OTA ===

    fn handle_check_for_updates(&mut self) {
        info!("update check requested over mesh");
        if let Some(hook) = &self.ota_check_hook {
            hook();
        }
    }
}
