//! Typed payload codecs.
//!
//! Each message kind with a non-empty payload gets a struct with
//! `encode`/`decode`. Encoding never exceeds what its carrier allows:
//! single-packet payloads fit one fragment, fragmented payloads
//! ([`SavePresetPayload`], [`SyncParam`]) are bounded by the codec's
//! maximum logical payload.

use std::net::Ipv4Addr;

use super::error::ProtocolError;
use crate::identity::{NodeId, NodeRole};

/// Longest group / device / animation name carried in fixed-width
/// fields (31 bytes + NUL).
pub const MAX_NAME_LEN: usize = 31;

const NAME_FIELD: usize = 32;

/// Read a NUL-terminated UTF-8 string, returning it and the remainder
/// after the terminator.
fn read_cstr(buf: &[u8]) -> Result<(String, &[u8]), ProtocolError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ProtocolError::Malformed("missing NUL terminator".into()))?;
    let s = std::str::from_utf8(&buf[..nul])
        .map_err(|_| ProtocolError::Malformed("invalid UTF-8 in string field".into()))?;
    Ok((s.to_string(), &buf[nul + 1..]))
}

fn write_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Read a fixed 32-byte NUL-padded name field.
fn read_name_field(buf: &[u8]) -> Result<String, ProtocolError> {
    if buf.len() < NAME_FIELD {
        return Err(ProtocolError::MessageTooShort {
            expected: NAME_FIELD,
            got: buf.len(),
        });
    }
    let end = buf[..NAME_FIELD]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(NAME_FIELD);
    let s = std::str::from_utf8(&buf[..end])
        .map_err(|_| ProtocolError::Malformed("invalid UTF-8 in name field".into()))?;
    Ok(s.to_string())
}

fn write_name_field(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    if s.len() > MAX_NAME_LEN {
        return Err(ProtocolError::StringTooLong {
            max: MAX_NAME_LEN,
            got: s.len(),
        });
    }
    let mut field = [0u8; NAME_FIELD];
    field[..s.len()].copy_from_slice(s.as_bytes());
    buf.extend_from_slice(&field);
    Ok(())
}

/// Periodic self-announcement.
///
/// `[ip:4 LE][role:1][group:32][device_name:32]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAnnouncement {
    pub ip: Ipv4Addr,
    pub role: NodeRole,
    pub group: String,
    pub device_name: String,
}

impl PeerAnnouncement {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(4 + 1 + 2 * NAME_FIELD);
        buf.extend_from_slice(&u32::from(self.ip).to_le_bytes());
        buf.push(self.role.to_byte());
        write_name_field(&mut buf, &self.group)?;
        write_name_field(&mut buf, &self.device_name)?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        const MIN: usize = 4 + 1 + 2 * NAME_FIELD;
        if payload.len() < MIN {
            return Err(ProtocolError::MessageTooShort {
                expected: MIN,
                got: payload.len(),
            });
        }
        let ip = Ipv4Addr::from(u32::from_le_bytes(
            payload[0..4]
                .try_into()
                .map_err(|_| ProtocolError::Malformed("bad ip".into()))?,
        ));
        let role = NodeRole::from_byte(payload[4]);
        let group = read_name_field(&payload[5..])?;
        let device_name = read_name_field(&payload[5 + NAME_FIELD..])?;
        Ok(Self {
            ip,
            role,
            group,
            device_name,
        })
    }
}

/// Master clock sample: the master's monotonic millisecond counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeSync {
    pub millis: u32,
}

impl TimeSync {
    pub fn encode(&self) -> Vec<u8> {
        self.millis.to_le_bytes().to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 4 {
            return Err(ProtocolError::MessageTooShort {
                expected: 4,
                got: payload.len(),
            });
        }
        Ok(Self {
            millis: u32::from_le_bytes(
                payload[0..4]
                    .try_into()
                    .map_err(|_| ProtocolError::Malformed("bad millis".into()))?,
            ),
        })
    }
}

/// Group-scoped animation selection.
///
/// `[animation:32][group:32][start_time:4 LE]`
///
/// `start_time` is carried for future phase alignment; selection is
/// applied immediately on receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnimationState {
    pub animation: String,
    pub group: String,
    pub start_time: u32,
}

impl AnimationState {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(2 * NAME_FIELD + 4);
        write_name_field(&mut buf, &self.animation)?;
        write_name_field(&mut buf, &self.group)?;
        buf.extend_from_slice(&self.start_time.to_le_bytes());
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        const MIN: usize = 2 * NAME_FIELD + 4;
        if payload.len() < MIN {
            return Err(ProtocolError::MessageTooShort {
                expected: MIN,
                got: payload.len(),
            });
        }
        let animation = read_name_field(payload)?;
        let group = read_name_field(&payload[NAME_FIELD..])?;
        let start_time = u32::from_le_bytes(
            payload[2 * NAME_FIELD..2 * NAME_FIELD + 4]
                .try_into()
                .map_err(|_| ProtocolError::Malformed("bad start_time".into()))?,
        );
        Ok(Self {
            animation,
            group,
            start_time,
        })
    }
}

/// Direct command: move one node into a group.
///
/// `[target:8 LE][group\0]` — applied only by the node whose id matches
/// `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignGroup {
    pub target: NodeId,
    pub group: String,
}

impl AssignGroup {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if self.group.len() > MAX_NAME_LEN {
            return Err(ProtocolError::StringTooLong {
                max: MAX_NAME_LEN,
                got: self.group.len(),
            });
        }
        let mut buf = Vec::with_capacity(8 + self.group.len() + 1);
        buf.extend_from_slice(&self.target.as_u64().to_le_bytes());
        write_cstr(&mut buf, &self.group);
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 9 {
            return Err(ProtocolError::MessageTooShort {
                expected: 9,
                got: payload.len(),
            });
        }
        let target = NodeId::from_raw(u64::from_le_bytes(
            payload[0..8]
                .try_into()
                .map_err(|_| ProtocolError::Malformed("bad target".into()))?,
        ));
        let (group, _) = read_cstr(&payload[8..])?;
        Ok(Self { target, group })
    }
}

/// Group-scoped parameter edit.
///
/// `[group\0][param_name\0][json_value]` — the JSON value runs to the
/// end of the logical payload and may be fragmented.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncParam {
    pub group: String,
    pub name: String,
    pub value_json: String,
}

impl SyncParam {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(self.group.len() + self.name.len() + self.value_json.len() + 2);
        write_cstr(&mut buf, &self.group);
        write_cstr(&mut buf, &self.name);
        buf.extend_from_slice(self.value_json.as_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (group, rest) = read_cstr(payload)?;
        let (name, rest) = read_cstr(rest)?;
        let value_json = std::str::from_utf8(rest)
            .map_err(|_| ProtocolError::Malformed("invalid UTF-8 in param value".into()))?
            .to_string();
        Ok(Self {
            group,
            name,
            value_json,
        })
    }
}

/// Group-scoped power state: `[group\0]['0'|'1']`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncPower {
    pub group: String,
    pub on: bool,
}

impl SyncPower {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.group.len() + 2);
        write_cstr(&mut buf, &self.group);
        buf.push(if self.on { b'1' } else { b'0' });
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (group, rest) = read_cstr(payload)?;
        match rest.first() {
            Some(b'1') => Ok(Self { group, on: true }),
            Some(b'0') => Ok(Self { group, on: false }),
            _ => Err(ProtocolError::Malformed("bad power flag".into())),
        }
    }
}

/// Replicated preset body: `[name\0][base_type\0][params_json]`.
///
/// Fragmented across as many frames as the JSON needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavePresetPayload {
    pub name: String,
    pub base_type: String,
    pub params_json: String,
}

impl SavePresetPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            self.name.len() + self.base_type.len() + self.params_json.len() + 2,
        );
        write_cstr(&mut buf, &self.name);
        write_cstr(&mut buf, &self.base_type);
        buf.extend_from_slice(self.params_json.as_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (name, rest) = read_cstr(payload)?;
        let (base_type, rest) = read_cstr(rest)?;
        let params_json = std::str::from_utf8(rest)
            .map_err(|_| ProtocolError::Malformed("invalid UTF-8 in params".into()))?
            .to_string();
        Ok(Self {
            name,
            base_type,
            params_json,
        })
    }
}

/// Rename broadcast: `[old\0][new\0]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenamePreset {
    pub old: String,
    pub new: String,
}

impl RenamePreset {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.old.len() + self.new.len() + 2);
        write_cstr(&mut buf, &self.old);
        write_cstr(&mut buf, &self.new);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (old, rest) = read_cstr(payload)?;
        let (new, _) = read_cstr(rest)?;
        Ok(Self { old, new })
    }
}

/// Bare preset name, used by `QueryPreset`, `PresetExistResponse`,
/// `DeletePreset` and `PresetManifest`: `[name\0]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamePayload {
    pub name: String,
}

impl NamePayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.name.len() + 1);
        write_cstr(&mut buf, &self.name);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (name, _) = read_cstr(payload)?;
        Ok(Self { name })
    }
}

/// Directed anti-entropy pull: `[target:8 LE][name\0]`.
///
/// Only the node whose id matches `target` answers, by starting a fresh
/// `SavePreset` broadcast for `name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestPresetData {
    pub target: NodeId,
    pub name: String,
}

impl RequestPresetData {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.name.len() + 1);
        buf.extend_from_slice(&self.target.as_u64().to_le_bytes());
        write_cstr(&mut buf, &self.name);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 9 {
            return Err(ProtocolError::MessageTooShort {
                expected: 9,
                got: payload.len(),
            });
        }
        let target = NodeId::from_raw(u64::from_le_bytes(
            payload[0..8]
                .try_into()
                .map_err(|_| ProtocolError::Malformed("bad target".into()))?,
        ));
        let (name, _) = read_cstr(&payload[8..])?;
        Ok(Self { target, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_announcement_round_trip() {
        let msg = PeerAnnouncement {
            ip: Ipv4Addr::new(192, 168, 4, 17),
            role: NodeRole::Slave,
            group: "living-room".into(),
            device_name: "shelf-strip".into(),
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded.len(), 69);
        assert_eq!(PeerAnnouncement::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_peer_announcement_rejects_long_group() {
        let msg = PeerAnnouncement {
            ip: Ipv4Addr::UNSPECIFIED,
            role: NodeRole::Idle,
            group: "x".repeat(32),
            device_name: String::new(),
        };
        assert!(matches!(
            msg.encode(),
            Err(ProtocolError::StringTooLong { max: 31, .. })
        ));
    }

    #[test]
    fn test_time_sync_round_trip() {
        let msg = TimeSync { millis: 0xdead_beef };
        assert_eq!(TimeSync::decode(&msg.encode()).unwrap(), msg);
        assert!(TimeSync::decode(&[1, 2]).is_err());
    }

    #[test]
    fn test_animation_state_round_trip() {
        let msg = AnimationState {
            animation: "Fire".into(),
            group: "stage".into(),
            start_time: 123_456,
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded.len(), 68);
        assert_eq!(AnimationState::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_assign_group_round_trip() {
        let msg = AssignGroup {
            target: NodeId::from_raw(0x1122),
            group: "hall".into(),
        };
        let decoded = AssignGroup::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_assign_group_empty_group() {
        // Clearing a node's group is a valid assignment.
        let msg = AssignGroup {
            target: NodeId::from_raw(9),
            group: String::new(),
        };
        assert_eq!(AssignGroup::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_sync_param_round_trip() {
        let msg = SyncParam {
            group: "room".into(),
            name: "Speed".into(),
            value_json: "2.5".into(),
        };
        assert_eq!(SyncParam::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_sync_param_json_may_contain_anything_after_nuls() {
        let msg = SyncParam {
            group: "g".into(),
            name: "Palette".into(),
            value_json: r##"["#FF0000","#0000FF"]"##.into(),
        };
        assert_eq!(SyncParam::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_sync_power_round_trip() {
        for on in [true, false] {
            let msg = SyncPower {
                group: "room".into(),
                on,
            };
            assert_eq!(SyncPower::decode(&msg.encode()).unwrap(), msg);
        }
        assert!(SyncPower::decode(b"room\0x").is_err());
        assert!(SyncPower::decode(b"room\0").is_err());
    }

    #[test]
    fn test_save_preset_round_trip() {
        let msg = SavePresetPayload {
            name: "Cool".into(),
            base_type: "Fire".into(),
            params_json: r#"{"Speed":1.0,"Cooling":55}"#.into(),
        };
        assert_eq!(SavePresetPayload::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_save_preset_missing_terminator() {
        assert!(SavePresetPayload::decode(b"only-a-name").is_err());
        assert!(SavePresetPayload::decode(b"name\0no-second-nul").is_err());
    }

    #[test]
    fn test_rename_round_trip() {
        let msg = RenamePreset {
            old: "A".into(),
            new: "B".into(),
        };
        assert_eq!(RenamePreset::decode(&msg.encode()).unwrap(), msg);
        assert!(RenamePreset::decode(b"A\0B-unterminated").is_err());
    }

    #[test]
    fn test_name_payload_round_trip() {
        let msg = NamePayload {
            name: "Sunset".into(),
        };
        assert_eq!(NamePayload::decode(&msg.encode()).unwrap(), msg);
        assert!(NamePayload::decode(b"no-terminator").is_err());
    }

    #[test]
    fn test_request_preset_data_round_trip() {
        let msg = RequestPresetData {
            target: NodeId::from_raw(0xffee_ddcc_bbaa_0099),
            name: "Sunset".into(),
        };
        assert_eq!(RequestPresetData::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_request_preset_data_too_short() {
        assert!(matches!(
            RequestPresetData::decode(&[0u8; 5]),
            Err(ProtocolError::MessageTooShort { .. })
        ));
    }
}
