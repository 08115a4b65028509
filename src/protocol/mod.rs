//! Mesh wire protocol.
//!
//! Wire format definitions for everything that crosses the broadcast
//! medium: the fixed 246-byte [`Frame`], the typed payload codecs, and
//! fragment reassembly for multi-packet transfers.
//!
//! Fixed-width fields are little-endian; string fields are
//! NUL-terminated UTF-8. The message-kind byte values are stable and
//! part of the on-air contract with deployed firmware, including gaps
//! left by deprecated kinds.

mod error;
mod frame;
mod payloads;
mod reassembly;

pub use error::ProtocolError;
pub use frame::{Frame, FRAME_SIZE, HEADER_SIZE, MAX_FRAGMENT_DATA, MAX_PAYLOAD};
pub use payloads::{
    AnimationState, AssignGroup, NamePayload, PeerAnnouncement, RenamePreset, RequestPresetData,
    SavePresetPayload, SyncParam, SyncPower, TimeSync, MAX_NAME_LEN,
};
pub use reassembly::ReassemblyBuffer;

/// Reassembly timeout for preset-class transfers.
pub const PRESET_REASSEMBLY_TIMEOUT_MS: u64 = 5_000;

/// Reassembly timeout for parameter-class transfers.
pub const PARAM_REASSEMBLY_TIMEOUT_MS: u64 = 5_000;

/// Message kinds with their stable wire byte values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Heartbeat = 0,
    Election = 1,
    Ok = 2,
    Coordinator = 3,
    /// Pixel-level frame mirroring. Deprecated; decoded and dropped.
    FrameData = 4,
    PeerAnnouncement = 5,
    Shutdown = 6,
    TimeSync = 7,
    AnimationState = 8,
    QueryPreset = 9,
    PresetExistResponse = 10,
    SavePreset = 11,
    DeletePreset = 12,
    CheckForUpdates = 13,
    RenamePreset = 14,
    AssignGroup = 15,
    SyncParam = 16,
    SyncPower = 17,
    RequestSyncPresets = 18,
    PresetManifest = 19,
    RequestPresetData = 20,
}

impl MessageKind {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(MessageKind::Heartbeat),
            1 => Some(MessageKind::Election),
            2 => Some(MessageKind::Ok),
            3 => Some(MessageKind::Coordinator),
            4 => Some(MessageKind::FrameData),
            5 => Some(MessageKind::PeerAnnouncement),
            6 => Some(MessageKind::Shutdown),
            7 => Some(MessageKind::TimeSync),
            8 => Some(MessageKind::AnimationState),
            9 => Some(MessageKind::QueryPreset),
            10 => Some(MessageKind::PresetExistResponse),
            11 => Some(MessageKind::SavePreset),
            12 => Some(MessageKind::DeletePreset),
            13 => Some(MessageKind::CheckForUpdates),
            14 => Some(MessageKind::RenamePreset),
            15 => Some(MessageKind::AssignGroup),
            16 => Some(MessageKind::SyncParam),
            17 => Some(MessageKind::SyncPower),
            18 => Some(MessageKind::RequestSyncPresets),
            19 => Some(MessageKind::PresetManifest),
            20 => Some(MessageKind::RequestPresetData),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_byte_values_are_stable() {
        // On-air contract with deployed firmware.
        assert_eq!(MessageKind::Heartbeat.to_byte(), 0);
        assert_eq!(MessageKind::Election.to_byte(), 1);
        assert_eq!(MessageKind::Ok.to_byte(), 2);
        assert_eq!(MessageKind::Coordinator.to_byte(), 3);
        assert_eq!(MessageKind::FrameData.to_byte(), 4);
        assert_eq!(MessageKind::PeerAnnouncement.to_byte(), 5);
        assert_eq!(MessageKind::Shutdown.to_byte(), 6);
        assert_eq!(MessageKind::TimeSync.to_byte(), 7);
        assert_eq!(MessageKind::AnimationState.to_byte(), 8);
        assert_eq!(MessageKind::QueryPreset.to_byte(), 9);
        assert_eq!(MessageKind::PresetExistResponse.to_byte(), 10);
        assert_eq!(MessageKind::SavePreset.to_byte(), 11);
        assert_eq!(MessageKind::DeletePreset.to_byte(), 12);
        assert_eq!(MessageKind::CheckForUpdates.to_byte(), 13);
        assert_eq!(MessageKind::RenamePreset.to_byte(), 14);
        assert_eq!(MessageKind::AssignGroup.to_byte(), 15);
        assert_eq!(MessageKind::SyncParam.to_byte(), 16);
        assert_eq!(MessageKind::SyncPower.to_byte(), 17);
        assert_eq!(MessageKind::RequestSyncPresets.to_byte(), 18);
        assert_eq!(MessageKind::PresetManifest.to_byte(), 19);
        assert_eq!(MessageKind::RequestPresetData.to_byte(), 20);
    }

    #[test]
    fn test_kind_round_trip() {
        for byte in 0..=20u8 {
            let kind = MessageKind::from_byte(byte).unwrap();
            assert_eq!(kind.to_byte(), byte);
        }
        assert!(MessageKind::from_byte(21).is_none());
        assert!(MessageKind::from_byte(0xff).is_none());
    }
}
